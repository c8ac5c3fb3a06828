use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type NodeId = String;
pub type ConversationId = String;

/// Default number of characters kept from the first user message as the title.
pub const DEFAULT_TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of a linear transcript, as handed to the streaming bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single message in the conversation tree.
///
/// Nodes only ever reference each other by id. `content` is fixed at creation; an edit or a
/// reroll produces a sibling node instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageNode {
    pub id: NodeId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    pub conversation_id: ConversationId,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl MessageNode {
    pub fn new(
        role: Role,
        content: impl Into<String>,
        parent_id: Option<NodeId>,
        conversation_id: impl Into<ConversationId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            parent_id,
            children: Vec::new(),
            conversation_id: conversation_id.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(
        content: impl Into<String>,
        parent_id: Option<NodeId>,
        conversation_id: impl Into<ConversationId>,
    ) -> Self {
        Self::new(Role::User, content, parent_id, conversation_id)
    }

    pub fn assistant(
        content: impl Into<String>,
        parent_id: Option<NodeId>,
        conversation_id: impl Into<ConversationId>,
    ) -> Self {
        Self::new(Role::Assistant, content, parent_id, conversation_id)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn to_turn(&self) -> Turn {
        Turn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    /// First node of the active path; `None` until the first message exists.
    #[serde(default)]
    pub root_message_id: Option<NodeId>,
    #[serde(default)]
    pub active_path: Vec<NodeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<ConversationId>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            root_message_id: None,
            active_path: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a conversation titled after its first user message.
    pub fn from_first_message(first_message: &str, title_max_chars: usize) -> Self {
        Self::new(
            Uuid::new_v4().to_string(),
            derive_title(first_message, title_max_chars),
        )
    }

    pub fn tail(&self) -> Option<&NodeId> {
        self.active_path.last()
    }

    pub fn contains_on_path(&self, node_id: &str) -> bool {
        self.active_path.iter().any(|id| id == node_id)
    }

    /// Replace the active path and keep `root_message_id` pointing at its first element.
    pub fn set_active_path(&mut self, path: Vec<NodeId>) {
        if let Some(first) = path.first() {
            self.root_message_id = Some(first.clone());
        }
        self.active_path = path;
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Title from the first user message: the first `max_chars` characters, with `...` appended
/// when anything was cut.
pub fn derive_title(first_message: &str, max_chars: usize) -> String {
    let trimmed = first_message.trim();
    let mut title: String = trimmed.chars().take(max_chars).collect();
    if trimmed.chars().count() > max_chars {
        title.push_str("...");
    }
    title
}

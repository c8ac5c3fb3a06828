use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::conversation::types::{Conversation, MessageNode};

/// File-backed storage: `<id>.json` holds the conversation record and `<id>.nodes.jsonl` is an
/// append-only log of node records. A node is re-appended whenever its children change, and
/// loading keeps the last record seen for each id.
#[derive(Debug, Clone)]
pub struct JsonlStorage {
    base_path: PathBuf,
}

impl JsonlStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.base_path).await
    }

    pub async fn save_conversation(&self, conversation: &Conversation) -> std::io::Result<()> {
        let path = self.conversation_path(&conversation.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(conversation)?;
        fs::write(&tmp, json).await?;
        fs::rename(tmp, path).await
    }

    pub async fn load_conversation(
        &self,
        conversation_id: &str,
    ) -> std::io::Result<Option<Conversation>> {
        let path = self.conversation_path(conversation_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        let conversation = serde_json::from_str(&content)?;
        Ok(Some(conversation))
    }

    pub async fn list_conversations(&self) -> std::io::Result<Vec<Conversation>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.base_path).await?;
        let mut conversations = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str::<Conversation>(&content) {
                Ok(conversation) => conversations.push(conversation),
                Err(error) => {
                    log::warn!("Skipping unreadable conversation file {:?}: {}", path, error)
                }
            }
        }

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    pub async fn append_node(&self, node: &MessageNode) -> std::io::Result<()> {
        let path = self.nodes_path(&node.conversation_id);
        let json = serde_json::to_string(node)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }

    /// Nodes of a conversation in the order they were first written.
    pub async fn load_nodes(&self, conversation_id: &str) -> std::io::Result<Vec<MessageNode>> {
        let path = self.nodes_path(conversation_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, MessageNode> = HashMap::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let node: MessageNode = match serde_json::from_str(&line) {
                Ok(node) => node,
                Err(error) => {
                    log::warn!(
                        "[{}] Skipping malformed node record: {}",
                        conversation_id,
                        error
                    );
                    continue;
                }
            };
            if !latest.contains_key(&node.id) {
                order.push(node.id.clone());
            }
            latest.insert(node.id.clone(), node);
        }

        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect())
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> std::io::Result<bool> {
        let conversation_path = self.conversation_path(conversation_id);
        let nodes_path = self.nodes_path(conversation_id);
        let mut deleted_any = false;

        for path in [conversation_path, nodes_path] {
            match fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_any = true;
                }
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(error),
            }
        }

        Ok(deleted_any)
    }

    fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", conversation_id))
    }

    fn nodes_path(&self, conversation_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.nodes.jsonl", conversation_id))
    }
}

#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn save_conversation(&self, conversation: &Conversation) -> std::io::Result<()>;
    async fn load_conversation(
        &self,
        conversation_id: &str,
    ) -> std::io::Result<Option<Conversation>>;
    async fn list_conversations(&self) -> std::io::Result<Vec<Conversation>>;
    async fn append_node(&self, node: &MessageNode) -> std::io::Result<()>;
    async fn load_nodes(&self, conversation_id: &str) -> std::io::Result<Vec<MessageNode>>;
    async fn delete_conversation(&self, conversation_id: &str) -> std::io::Result<bool>;
}

#[async_trait::async_trait]
impl Storage for JsonlStorage {
    async fn save_conversation(&self, conversation: &Conversation) -> std::io::Result<()> {
        JsonlStorage::save_conversation(self, conversation).await
    }

    async fn load_conversation(
        &self,
        conversation_id: &str,
    ) -> std::io::Result<Option<Conversation>> {
        JsonlStorage::load_conversation(self, conversation_id).await
    }

    async fn list_conversations(&self) -> std::io::Result<Vec<Conversation>> {
        JsonlStorage::list_conversations(self).await
    }

    async fn append_node(&self, node: &MessageNode) -> std::io::Result<()> {
        JsonlStorage::append_node(self, node).await
    }

    async fn load_nodes(&self, conversation_id: &str) -> std::io::Result<Vec<MessageNode>> {
        JsonlStorage::load_nodes(self, conversation_id).await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> std::io::Result<bool> {
        JsonlStorage::delete_conversation(self, conversation_id).await
    }
}

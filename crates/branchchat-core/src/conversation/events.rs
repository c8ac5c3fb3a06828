use serde::{Deserialize, Serialize};

use super::types::{ConversationId, NodeId};

/// Events emitted to the transport for one generation turn.
///
/// A turn always emits `Started`, then any number of `Token`s, then exactly one of
/// `Complete` or `Error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Started {
        conversation_id: ConversationId,
        user_node_id: NodeId,
    },

    Token {
        content: String,
    },

    Complete {
        assistant_node_id: NodeId,
        active_path: Vec<NodeId>,
    },

    Error {
        message: String,
        /// Text for a synthetic assistant bubble; never committed to the tree.
        #[serde(skip_serializing_if = "Option::is_none")]
        failure_marker: Option<String>,
    },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

use serde::{Deserialize, Serialize};

/// Lifecycle of a conversation with respect to generation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// No generation in flight; the tree may be read and branches selected.
    #[default]
    Idle,

    /// A Send, Edit or Reroll is waiting on the streaming bridge.
    AwaitingCompletion,
}

impl ConversationState {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::AwaitingCompletion)
    }
}

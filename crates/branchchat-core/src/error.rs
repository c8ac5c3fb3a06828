use thiserror::Error;

use crate::conversation::types::Role;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Message node not found: {0}")]
    NodeNotFound(String),

    #[error("Generation already in flight for conversation {0}")]
    Conflict(String),

    #[error("Branch index {index} out of range for {count} branches")]
    OutOfRange { index: usize, count: usize },

    #[error("Node {node_id} is not a {expected:?} message")]
    WrongRole { node_id: String, expected: Role },

    #[error("Invalid active path: {0}")]
    InvalidPath(String),

    #[error("Upstream failure: {0}")]
    UpstreamFailure(#[from] UpstreamError),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Why the streaming bridge did not deliver a complete reply.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("cancelled")]
    Cancelled,
}

impl TreeError {
    /// Short machine-readable name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConversationNotFound(_) | Self::NodeNotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::OutOfRange { .. } => "out_of_range",
            Self::WrongRole { .. } => "wrong_role",
            Self::InvalidPath(_) => "invalid_path",
            Self::UpstreamFailure(_) => "upstream_failure",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::Storage(_) => "storage",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ConversationNotFound(_) | Self::NodeNotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::UpstreamFailure(UpstreamError::Cancelled))
    }
}

impl From<std::io::Error> for TreeError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

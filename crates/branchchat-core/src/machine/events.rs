use serde::{Deserialize, Serialize};

/// Events that drive [`super::StateMachine`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ChatEvent {
    /// Send, Edit or Reroll asked the bridge for a reply.
    GenerationRequested,

    /// The reply finished and was committed.
    StreamCompleted,

    /// The bridge failed; nothing was committed.
    StreamFailed { error: String },

    /// The caller abandoned the generation.
    Cancelled,
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GenerationRequested => "generation_requested",
            Self::StreamCompleted => "stream_completed",
            Self::StreamFailed { .. } => "stream_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

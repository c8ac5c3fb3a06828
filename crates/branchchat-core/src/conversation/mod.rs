pub mod events;
pub mod types;

pub use events::TurnEvent;
pub use types::{Conversation, ConversationId, ConversationSummary, MessageNode, NodeId, Role, Turn};

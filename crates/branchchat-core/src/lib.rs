//! branchchat-core - Conversation tree primitives
//!
//! This crate provides the data model and the pure tree logic shared by every other crate:
//! - `conversation` - MessageNode, Conversation, Turn and the per-turn transport events
//! - `tree` - the node store, transcript navigation and branch selection
//! - `machine` - the per-conversation generation state machine
//! - `storage` - persistence trait and the JSON/JSONL file backend

pub mod conversation;
pub mod error;
pub mod machine;
pub mod storage;
pub mod tree;

pub use conversation::events::TurnEvent;
pub use conversation::types::{
    Conversation, ConversationId, ConversationSummary, MessageNode, NodeId, Role, Turn,
};
pub use error::{TreeError, UpstreamError};
pub use machine::{ChatEvent, ConversationState, StateMachine, StateTransition, TransitionError};
pub use storage::{JsonlStorage, Storage};
pub use tree::{
    branch_position, build_history, cycle_branch, extend_path, list_branches, path_to,
    render_path, select_branch, validate_path, BranchAnchor, BranchDirection, NodeStore,
    TranscriptEntry,
};

pub type Result<T> = std::result::Result<T, TreeError>;

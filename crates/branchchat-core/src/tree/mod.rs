//! Conversation tree: node arena, transcript navigation and branch selection

pub mod branch;
pub mod navigator;
pub mod store;

pub use branch::{branch_position, cycle_branch, select_branch, BranchDirection};
pub use navigator::{
    build_history, extend_path, list_branches, path_to, render_path, validate_path, BranchAnchor,
    TranscriptEntry,
};
pub use store::NodeStore;

//! Persistence for conversations and their nodes

mod jsonl;

pub use jsonl::{JsonlStorage, Storage};

//! branchchat-llm - Streaming bridge to chat-completion providers
//!
//! Every provider turns a linear transcript into a stream of text chunks. Tool calling and
//! multimodal content are not modelled.

pub mod provider;
pub mod providers;
pub mod types;

pub use provider::{LLMError, LLMProvider, LLMStream};
pub use providers::{AnthropicProvider, OpenAIProvider};
pub use types::LLMChunk;

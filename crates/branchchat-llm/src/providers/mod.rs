//! LLM Providers

pub(crate) mod common;
pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;

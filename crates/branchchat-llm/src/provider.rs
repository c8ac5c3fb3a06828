use std::pin::Pin;

use async_trait::async_trait;
use branchchat_core::{Turn, UpstreamError};
use futures::Stream;
use thiserror::Error;

use crate::types::LLMChunk;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl From<LLMError> for UpstreamError {
    fn from(error: LLMError) -> Self {
        match error {
            LLMError::Stream(message) => UpstreamError::Stream(message),
            other => UpstreamError::Provider(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LLMError>;

pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMChunk>> + Send>>;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Stream a reply to `turns`.
    ///
    /// # Arguments
    /// * `turns` - Linear transcript, oldest first, ending with a user turn
    /// * `max_output_tokens` - Maximum output tokens; providers fall back to their own default
    /// * `model` - Optional model override. If None, uses the provider's default model
    async fn chat_stream(
        &self,
        turns: &[Turn],
        max_output_tokens: Option<u32>,
        model: Option<&str>,
    ) -> Result<LLMStream>;

    /// Short provider name used in logs.
    fn name(&self) -> &'static str {
        "llm"
    }
}

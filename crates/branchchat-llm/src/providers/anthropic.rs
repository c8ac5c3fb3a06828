//! Anthropic Messages API provider.

use async_trait::async_trait;
use branchchat_core::{Role, Turn};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};

use crate::provider::{LLMError, LLMProvider, LLMStream, Result};
use crate::types::LLMChunk;

use super::common::sse::llm_stream_from_sse;

/// Output token limit used when the caller does not pass one.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| LLMError::Auth(format!("Invalid API key: {}", e)))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat_stream(
        &self,
        turns: &[Turn],
        max_output_tokens: Option<u32>,
        model: Option<&str>,
    ) -> Result<LLMStream> {
        let model = model.unwrap_or(&self.model);
        let max_tokens = max_output_tokens.unwrap_or(self.max_tokens);
        let body = build_anthropic_request(turns, model, max_tokens);
        let headers = self.build_headers()?;
        log::debug!(
            "Anthropic request: model={}, max_tokens={}, turns={}",
            model,
            max_tokens,
            turns.len()
        );

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;

            if status == 401 || status == 403 {
                return Err(LLMError::Auth(format!(
                    "Anthropic authentication failed: {}. Please check your API key.",
                    text
                )));
            }

            return Err(LLMError::Api(format!(
                "Anthropic API error: HTTP {}: {}",
                status, text
            )));
        }

        Ok(llm_stream_from_sse(response, parse_anthropic_sse_event))
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

/// Messages API request body for a text-only transcript.
pub fn build_anthropic_request(turns: &[Turn], model: &str, max_tokens: u32) -> Value {
    let messages: Vec<Value> = turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            json!({
                "role": role,
                "content": [{ "type": "text", "text": turn.content }],
            })
        })
        .collect();

    json!({
        "model": model,
        "max_tokens": max_tokens,
        "stream": true,
        "messages": messages,
    })
}

/// Parse one Anthropic SSE event.
///
/// Text deltas become tokens and `message_stop` ends the reply. Bookkeeping events are
/// skipped; an `error` event or malformed JSON is an error.
pub fn parse_anthropic_sse_event(event_type: &str, data: &str) -> Result<Option<LLMChunk>> {
    match event_type {
        "message_stop" => Ok(Some(LLMChunk::Done)),
        "error" => Err(LLMError::Api(format!("Anthropic error event: {data}"))),
        "content_block_delta" => {
            if data.is_empty() {
                return Ok(None);
            }

            let v: Value = serde_json::from_str(data)?;
            let Some(delta) = v.get("delta") else {
                return Ok(None);
            };
            if delta.get("type").and_then(|t| t.as_str()) != Some("text_delta") {
                return Ok(None);
            }

            match delta.get("text").and_then(|t| t.as_str()) {
                Some(text) if !text.is_empty() => Ok(Some(LLMChunk::Token(text.to_string()))),
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

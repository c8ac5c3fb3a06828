//! OpenAI-compatible request and stream helpers.
//!
//! Many hosted and local servers accept OpenAI's chat completions shape, so the body builder
//! and the `data:` parser live here rather than in the OpenAI provider itself.

use branchchat_core::{Role, Turn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::provider::Result;
use crate::types::LLMChunk;

pub fn turns_to_openai_compat_json(turns: &[Turn]) -> Vec<Value> {
    turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            json!({
                "role": role,
                "content": turn.content,
            })
        })
        .collect()
}

/// Build a streaming chat request body.
pub fn build_openai_compat_body(
    model: &str,
    turns: &[Turn],
    max_output_tokens: Option<u32>,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": turns_to_openai_compat_json(turns),
        "stream": true,
    });

    if let Some(max_tokens) = max_output_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    body
}

#[derive(Debug, Deserialize)]
pub struct OpenAICompatStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAICompatChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatChoice {
    #[serde(default)]
    delta: OpenAICompatDelta,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAICompatDelta {
    content: Option<String>,
}

/// Text carried by one stream chunk; `None` for role-only or empty deltas.
pub fn parse_openai_compat_chunk(chunk: OpenAICompatStreamChunk) -> Option<LLMChunk> {
    let content = chunk.choices.into_iter().next()?.delta.content?;
    if content.is_empty() {
        return None;
    }
    Some(LLMChunk::Token(content))
}

/// Parse an SSE `data:` payload.
///
/// - `"[DONE]"` -> `LLMChunk::Done`
/// - Invalid JSON -> error
pub fn parse_openai_compat_sse_data(data: &str) -> Result<Option<LLMChunk>> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(LLMChunk::Done));
    }

    let chunk: OpenAICompatStreamChunk = serde_json::from_str(data)?;
    Ok(parse_openai_compat_chunk(chunk))
}

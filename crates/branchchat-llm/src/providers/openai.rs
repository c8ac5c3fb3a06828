use async_trait::async_trait;
use branchchat_core::Turn;
use reqwest::Client;

use crate::provider::{LLMError, LLMProvider, LLMStream, Result};

use super::common::openai_compat::{build_openai_compat_body, parse_openai_compat_sse_data};
use super::common::sse::llm_stream_from_sse;

pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
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
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn chat_stream(
        &self,
        turns: &[Turn],
        max_output_tokens: Option<u32>,
        model: Option<&str>,
    ) -> Result<LLMStream> {
        let model = model.unwrap_or(&self.model);
        let body = build_openai_compat_body(model, turns, max_output_tokens);
        log::debug!("OpenAI request: model={}, turns={}", model, turns.len());

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            if status == 401 || status == 403 {
                return Err(LLMError::Auth(format!("HTTP {}: {}", status, text)));
            }
            return Err(LLMError::Api(format!("HTTP {}: {}", status, text)));
        }

        Ok(llm_stream_from_sse(response, |_event, data| {
            parse_openai_compat_sse_data(data)
        }))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LLMChunk;
    use futures_util::StreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn streams_tokens_until_done() {
        if std::env::var_os("BRANCHCHAT_SKIP_NETWORK_TESTS").is_some() {
            return;
        }

        let mock_server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
            "data: [DONE]\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "override",
                "max_tokens": 4096
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body),
            )
            .mount(&mock_server)
            .await;

        let provider = OpenAIProvider::new("sk-test").with_base_url(mock_server.uri());
        let stream = provider
            .chat_stream(&[Turn::user("hello")], Some(4096), Some("override"))
            .await
            .expect("stream");
        let chunks: Vec<LLMChunk> = stream.map(|c| c.expect("chunk")).collect().await;

        assert_eq!(
            chunks,
            vec![
                LLMChunk::Token("Hi".to_string()),
                LLMChunk::Token(" there".to_string()),
                LLMChunk::Done,
            ]
        );
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        if std::env::var_os("BRANCHCHAT_SKIP_NETWORK_TESTS").is_some() {
            return;
        }

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&mock_server)
            .await;

        let provider = OpenAIProvider::new("sk-wrong").with_base_url(mock_server.uri());
        let result = provider.chat_stream(&[Turn::user("hello")], None, None).await;

        assert!(matches!(result, Err(LLMError::Auth(message)) if message.contains("bad key")));
    }
}

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, HttpResponse};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use branchchat_core::{JsonlStorage, TurnEvent};
use branchchat_engine::{ControllerConfig, ConversationController, PreparedTurn};
use branchchat_llm::{AnthropicProvider, LLMProvider, OpenAIProvider};

use crate::server::ServerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderKind {
    #[value(name = "openai")]
    OpenAI,
    Anthropic,
}

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<ConversationController>,
}

impl AppState {
    pub fn new(controller: Arc<ConversationController>) -> Self {
        Self { controller }
    }

    /// Build the provider, open storage under the data directory and hydrate it.
    pub async fn new_with_config(config: &ServerConfig) -> io::Result<Self> {
        let llm = build_provider(config);
        let data_dir = config.data_dir.clone().unwrap_or_else(default_data_dir);
        let storage = JsonlStorage::new(data_dir.join("conversations"));
        storage.init().await?;
        log::info!("Conversation data directory: {:?}", storage.base_path());

        let controller_config = ControllerConfig {
            max_output_tokens: config.max_tokens,
            ..ControllerConfig::default()
        };
        let controller =
            ConversationController::new(llm, controller_config).with_storage(Arc::new(storage));

        if let Err(error) = controller.load_from_storage().await {
            log::error!("Failed to load stored conversations: {}", error);
        }

        Ok(Self::new(Arc::new(controller)))
    }
}

fn build_provider(config: &ServerConfig) -> Arc<dyn LLMProvider> {
    match config.provider {
        ProviderKind::OpenAI => {
            let mut provider = OpenAIProvider::new(config.api_key.clone());
            if let Some(url) = &config.llm_base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(model) = &config.model {
                provider = provider.with_model(model);
            }
            Arc::new(provider)
        }
        ProviderKind::Anthropic => {
            let mut provider =
                AnthropicProvider::new(config.api_key.clone()).with_max_tokens(config.max_tokens);
            if let Some(url) = &config.llm_base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(model) = &config.model {
                provider = provider.with_model(model);
            }
            Arc::new(provider)
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".branchchat")
}

/// Run a prepared turn in the background and answer with its events as SSE.
pub fn stream_turn(controller: Arc<ConversationController>, turn: PreparedTurn) -> HttpResponse {
    let conversation_id = turn.conversation_id().to_string();
    let cancel = turn.cancel_token();

    let (sse_tx, mut sse_rx) = mpsc::channel::<web::Bytes>(100);
    let (event_tx, event_rx) = mpsc::channel::<TurnEvent>(100);

    let _sse_handle = spawn_sse_sender(event_rx, sse_tx, cancel);

    tokio::spawn(async move {
        match controller.run_turn(turn, &event_tx).await {
            Ok(outcome) => log::debug!(
                "[{}] Turn streamed, assistant node {}",
                conversation_id,
                outcome.assistant_node_id
            ),
            Err(error) => log::warn!("[{}] Turn ended with error: {}", conversation_id, error),
        }
    });

    HttpResponse::Ok()
        .append_header((header::CONTENT_TYPE, "text/event-stream"))
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .append_header((header::CONNECTION, "keep-alive"))
        .streaming(async_stream::stream! {
            while let Some(item) = sse_rx.recv().await {
                yield Ok::<_, actix_web::Error>(item);
            }
        })
}

/// Forward turn events as `data:` frames until a terminal event.
///
/// If the client goes away first, the turn is cancelled.
pub fn spawn_sse_sender(
    mut rx: mpsc::Receiver<TurnEvent>,
    tx: mpsc::Sender<web::Bytes>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = tx.closed() => {
                    log::info!("SSE client disconnected, cancelling turn");
                    cancel.cancel();
                    break;
                }
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let event_json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(_) => continue,
            };
            let bytes = web::Bytes::from(format!("data: {}\n\n", event_json));

            if tx.send(bytes).await.is_err() {
                cancel.cancel();
                break;
            }

            if event.is_terminal() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sse_sender_frames_events_and_stops_at_terminal() {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (sse_tx, mut sse_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = spawn_sse_sender(event_rx, sse_tx, cancel.clone());

        event_tx
            .send(TurnEvent::Token {
                content: "hi".to_string(),
            })
            .await
            .unwrap();
        event_tx
            .send(TurnEvent::Error {
                message: "boom".to_string(),
                failure_marker: None,
            })
            .await
            .unwrap();
        event_tx
            .send(TurnEvent::Token {
                content: "late".to_string(),
            })
            .await
            .unwrap();
        handle.await.unwrap();

        let first = sse_rx.recv().await.unwrap();
        assert_eq!(first, web::Bytes::from("data: {\"type\":\"token\",\"content\":\"hi\"}\n\n"));
        let second = sse_rx.recv().await.unwrap();
        assert!(std::str::from_utf8(&second).unwrap().contains("\"type\":\"error\""));
        assert!(sse_rx.recv().await.is_none());
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn state_reloads_conversations_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            port: 0,
            provider: ProviderKind::OpenAI,
            llm_base_url: Some("http://localhost:1/".to_string()),
            model: None,
            api_key: "test".to_string(),
            data_dir: Some(dir.path().to_path_buf()),
            max_tokens: 256,
        };

        let first = AppState::new_with_config(&config).await.unwrap();
        assert_eq!(first.controller.config().max_output_tokens, 256);
        let conversation = first.controller.start("remember me").await.unwrap();

        let second = AppState::new_with_config(&config).await.unwrap();
        let summaries = second.controller.list_conversations().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, conversation.id);
        let history = second.controller.history(&conversation.id).await.unwrap();
        assert_eq!(history[0].content, "remember me");
    }

    #[tokio::test]
    async fn sse_sender_cancels_when_client_disconnects() {
        let (_event_tx, event_rx) = mpsc::channel::<TurnEvent>(8);
        let (sse_tx, sse_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = spawn_sse_sender(event_rx, sse_tx, cancel.clone());

        drop(sse_rx);
        handle.await.unwrap();
        assert!(cancel.is_cancelled());
    }
}

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use branchchat_core::{TurnEvent, UpstreamError};
use branchchat_llm::{LLMChunk, LLMStream};

/// Reply text staged while a generation is in flight.
#[derive(Debug, Default)]
pub struct StagedReply {
    pub content: String,
    pub chunk_count: usize,
}

/// Drain `stream` into a [`StagedReply`], forwarding every text fragment as a token event.
///
/// Ends at `Done` or at the end of the stream. Cancellation is observed between chunks and while
/// waiting for the next one; a cancelled or failed stream returns its error and the staged text
/// is dropped with it.
pub async fn consume_llm_stream(
    mut stream: LLMStream,
    event_tx: &mpsc::Sender<TurnEvent>,
    cancel_token: &CancellationToken,
    conversation_id: &str,
) -> Result<StagedReply, UpstreamError> {
    let mut staged = StagedReply::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log::info!("[{}] Generation cancelled after {} chunks", conversation_id, staged.chunk_count);
                return Err(UpstreamError::Cancelled);
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(LLMChunk::Token(token))) => {
                if token.is_empty() {
                    continue;
                }
                staged.chunk_count += 1;
                staged.content.push_str(&token);

                let _ = event_tx.send(TurnEvent::Token { content: token }).await;
            }
            Some(Ok(LLMChunk::Done)) | None => {
                log::debug!(
                    "[{}] LLM stream completed, {} chars staged",
                    conversation_id,
                    staged.content.len()
                );
                return Ok(staged);
            }
            Some(Err(error)) => {
                log::warn!("[{}] LLM stream failed: {}", conversation_id, error);
                return Err(error.into());
            }
        }
    }
}

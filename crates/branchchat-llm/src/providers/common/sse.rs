//! Server-sent events -> [`LLMStream`] adapter.

use eventsource_stream::Eventsource;
use futures_util::{future, StreamExt};
use reqwest::Response;

use crate::provider::{LLMError, LLMStream, Result};
use crate::types::LLMChunk;

/// Turn an SSE response into an [`LLMStream`].
///
/// `handler` gets the event name and data payload of every event and returns:
/// - `Ok(Some(chunk))` to emit a chunk
/// - `Ok(None)` to skip the event
/// - `Err(_)` to emit an error, reported as `LLMError::Stream`
///
/// The stream ends right after the first [`LLMChunk::Done`], even if the connection stays open.
pub fn llm_stream_from_sse<H>(response: Response, mut handler: H) -> LLMStream
where
    H: FnMut(&str, &str) -> Result<Option<LLMChunk>> + Send + 'static,
{
    let stream = response
        .bytes_stream()
        .eventsource()
        .map(move |event| {
            let event = event.map_err(|e| LLMError::Stream(e.to_string()))?;
            handler(event.event.as_str(), event.data.as_str()).map_err(|err| match err {
                LLMError::Stream(message) => LLMError::Stream(message),
                other => LLMError::Stream(other.to_string()),
            })
        })
        .filter_map(|result| future::ready(result.transpose()))
        .scan(false, |finished, item| {
            if *finished {
                return future::ready(None);
            }
            *finished = matches!(item, Ok(LLMChunk::Done));
            future::ready(Some(item))
        });

    Box::pin(stream)
}

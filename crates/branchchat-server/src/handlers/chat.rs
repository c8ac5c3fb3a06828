use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::{ApiError, Result};
use crate::state::{stream_turn, AppState};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Node to answer under; defaults to the tail of the active path.
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Start a conversation or continue one, streaming the reply.
pub async fn handler(
    state: web::Data<AppState>,
    req: web::Json<ChatRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    if req.conversation_id.is_none() && req.parent_id.is_some() {
        return Err(ApiError::BadRequest(
            "parent_id requires a conversation_id".to_string(),
        ));
    }

    let controller = state.controller.clone();
    let turn = match req.conversation_id.as_deref() {
        Some(conversation_id) => {
            controller
                .prepare_send(conversation_id, &req.message, req.parent_id.as_deref())
                .await?
        }
        None => {
            let conversation = controller.start(&req.message).await?;
            controller.prepare_respond(&conversation.id).await?
        }
    };

    log::info!("[{}] Chat turn accepted", turn.conversation_id());
    Ok(stream_turn(controller, turn))
}

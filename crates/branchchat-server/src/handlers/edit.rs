use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::{ApiError, Result};
use crate::state::{stream_turn, AppState};

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub node_id: String,
    pub content: String,
}

pub async fn handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<EditRequest>,
) -> Result<HttpResponse> {
    let conversation_id = path.into_inner();
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".to_string()));
    }

    let controller = state.controller.clone();
    let turn = controller
        .prepare_edit(&conversation_id, &req.node_id, &req.content)
        .await?;

    log::info!("[{}] Edit of {} accepted", conversation_id, req.node_id);
    Ok(stream_turn(controller, turn))
}

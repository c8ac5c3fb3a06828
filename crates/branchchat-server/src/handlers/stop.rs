use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::error::Result;
use crate::state::AppState;

#[derive(Serialize)]
struct StopResponse {
    success: bool,
    message: String,
}

pub async fn handler(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let conversation_id = path.into_inner();
    log::info!("[{}] Stop request received", conversation_id);

    // 404 for an unknown conversation before looking for a running turn.
    state.controller.get_conversation(&conversation_id).await?;

    if state.controller.cancel(&conversation_id) {
        Ok(HttpResponse::Ok().json(StopResponse {
            success: true,
            message: "Generation stopped".to_string(),
        }))
    } else {
        log::warn!("[{}] No generation in flight", conversation_id);
        Ok(HttpResponse::NotFound().json(StopResponse {
            success: false,
            message: "No generation in flight".to_string(),
        }))
    }
}

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::Result;
use crate::state::{stream_turn, AppState};

#[derive(Debug, Deserialize)]
pub struct RerollRequest {
    pub node_id: String,
}

pub async fn handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<RerollRequest>,
) -> Result<HttpResponse> {
    let conversation_id = path.into_inner();
    let controller = state.controller.clone();
    let turn = controller
        .prepare_reroll(&conversation_id, &req.node_id)
        .await?;

    log::info!("[{}] Reroll of {} accepted", conversation_id, req.node_id);
    Ok(stream_turn(controller, turn))
}

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use branchchat_core::{NodeId, Role};

use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivePathRequest {
    pub active_path: Vec<NodeId>,
}

pub async fn list(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.controller.list_conversations().await)
}

pub async fn get(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let view = state.controller.get_conversation(&path).await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn delete(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let conversation_id = path.into_inner();
    state.controller.delete_conversation(&conversation_id).await?;
    Ok(HttpResponse::Ok().finish())
}

pub async fn list_messages(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let messages = state.controller.list_messages(&path).await?;
    Ok(HttpResponse::Ok().json(messages))
}

pub async fn append_message(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<AppendMessageRequest>,
) -> Result<HttpResponse> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".to_string()));
    }
    let node = state
        .controller
        .append_message(&path, req.role, &req.content, req.parent_id.as_deref())
        .await?;
    Ok(HttpResponse::Created().json(node))
}

pub async fn set_active_path(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<ActivePathRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    let conversation = state
        .controller
        .set_active_path(&path, req.active_path)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

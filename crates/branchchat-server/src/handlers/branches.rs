use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use branchchat_core::{BranchDirection, NodeId};

use crate::error::Result;
use crate::state::AppState;

/// `node_id` absent means the conversation's root-level branches.
#[derive(Debug, Deserialize)]
pub struct BranchQuery {
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectBranchRequest {
    #[serde(default)]
    pub node_id: Option<String>,
    pub branch_index: usize,
}

#[derive(Debug, Deserialize)]
pub struct CycleBranchRequest {
    #[serde(default)]
    pub node_id: Option<String>,
    pub direction: BranchDirection,
}

#[derive(Debug, Serialize)]
pub struct BranchPosition {
    pub index: usize,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct BranchesResponse {
    pub node_id: Option<String>,
    pub branches: Vec<NodeId>,
    pub position: Option<BranchPosition>,
}

#[derive(Debug, Serialize)]
pub struct ActivePathResponse {
    pub active_path: Vec<NodeId>,
}

pub async fn list(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<BranchQuery>,
) -> Result<HttpResponse> {
    let conversation_id = path.into_inner();
    let node_id = query.into_inner().node_id;

    let branches = state
        .controller
        .list_branches(&conversation_id, node_id.as_deref())
        .await?;
    let position = state
        .controller
        .branch_position(&conversation_id, node_id.as_deref())
        .await?
        .map(|(index, count)| BranchPosition { index, count });

    Ok(HttpResponse::Ok().json(BranchesResponse {
        node_id,
        branches,
        position,
    }))
}

pub async fn select(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<SelectBranchRequest>,
) -> Result<HttpResponse> {
    let active_path = state
        .controller
        .select_branch(&path, req.node_id.as_deref(), req.branch_index)
        .await?;
    Ok(HttpResponse::Ok().json(ActivePathResponse { active_path }))
}

pub async fn cycle(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<CycleBranchRequest>,
) -> Result<HttpResponse> {
    let active_path = state
        .controller
        .cycle_branch(&path, req.node_id.as_deref(), req.direction)
        .await?;
    Ok(HttpResponse::Ok().json(ActivePathResponse { active_path }))
}

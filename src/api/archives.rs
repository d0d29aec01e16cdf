// src/api/archives.rs
// Archive routes (spec §6).

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::state::AppState;
use crate::storage::types::Archive;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/archives", get(list).post(create))
        .route("/api/archives/move", post(move_session))
}

#[derive(Deserialize)]
struct CreateArchiveRequest {
    name: String,
}

async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<Archive>>> {
    Ok(Json(state.engine.list_archives().await?))
}

async fn create(State(state): State<AppState>, Json(req): Json<CreateArchiveRequest>) -> AppResult<Json<Archive>> {
    Ok(Json(state.engine.create_archive(&req.name).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveRequest {
    session_id: String,
    archive_name: String,
}

async fn move_session(State(state): State<AppState>, Json(req): Json<MoveRequest>) -> AppResult<Json<serde_json::Value>> {
    state.engine.move_to_archive(&req.archive_name, &req.session_id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// src/api/notifications.rs
// Notification routes (spec §6).

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::state::AppState;
use crate::storage::types::Notification;

const DEFAULT_CHANNEL: &str = "default";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list).post(create))
        .route("/api/notifications/read", post(mark_read))
}

#[derive(Deserialize)]
struct CreateNotificationRequest {
    #[serde(default = "default_channel")]
    channel: String,
    message: String,
    metadata: Option<String>,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<Notification>>> {
    Ok(Json(state.engine.get_notifications(DEFAULT_CHANNEL).await?))
}

async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateNotificationRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let id = state
        .engine
        .add_notification(&req.channel, &req.message, req.metadata.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "id": id, "status": "ok" })))
}

#[derive(Deserialize)]
struct MarkReadRequest {
    ids: Vec<i64>,
}

async fn mark_read(State(state): State<AppState>, Json(req): Json<MarkReadRequest>) -> AppResult<Json<serde_json::Value>> {
    state.engine.mark_notifications_read(&req.ids).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

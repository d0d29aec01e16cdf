// src/api/status.rs
// Pause/resume flag and health check handlers (spec §6). Wired into two
// different auth groups by `api::build_router` — `/api/status` requires the
// bearer token, `/api/health` does not — so this module exposes bare
// handlers rather than its own `Router`.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::storage::types::HealthStatus;

#[derive(Serialize, Deserialize)]
pub struct StatusBody {
    pub paused: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusBody> {
    Json(StatusBody { paused: state.is_paused() })
}

pub async fn set_status(State(state): State<AppState>, Json(body): Json<StatusBody>) -> Json<StatusBody> {
    state.set_paused(body.paused);
    Json(StatusBody { paused: state.is_paused() })
}

pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let mut status = state.engine.health_check().await;
    let migration_status = state.migration.read().await.state().status;
    status.migration = serde_json::to_value(migration_status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "idle".to_string());
    Json(status)
}

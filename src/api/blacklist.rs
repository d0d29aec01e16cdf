// src/api/blacklist.rs
// Process blacklist routes (spec §6).

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::AppResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/blacklist", get(list).post(replace))
}

async fn list(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.blacklist.snapshot().await)
}

async fn replace(State(state): State<AppState>, Json(names): Json<Vec<String>>) -> AppResult<Json<Vec<String>>> {
    state.blacklist.replace(names).await?;
    Ok(Json(state.blacklist.snapshot().await))
}

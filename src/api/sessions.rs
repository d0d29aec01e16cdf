// src/api/sessions.rs
// Session, metadata, and activity-block routes (spec §6).

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::AppResult;
use crate::storage::types::SessionMetadata;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", get(list_sessions))
        .route(
            "/api/sessions/{date}",
            get(list_apps).put(upsert_session).delete(delete_session),
        )
        .route("/api/sessions/{date}/metadata", get(get_metadata))
        .route("/api/sessions/{date}/{app}/blocks", get(get_blocks))
}

async fn list_sessions(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    Ok(Json(state.engine.list_session_dates().await?))
}

async fn list_apps(State(state): State<AppState>, Path(date): Path<String>) -> AppResult<Json<Vec<String>>> {
    Ok(Json(state.engine.list_apps_for_session(&date).await?))
}

async fn upsert_session(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Json(metadata): Json<SessionMetadata>,
) -> AppResult<Json<serde_json::Value>> {
    let mut session = match state.engine.get_session(&date).await {
        Ok(session) => session,
        Err(e) if e.kind() == crate::error::ErrorKind::NotFound => {
            state.engine.create_session(&date).await?
        }
        Err(e) => return Err(e),
    };

    session.custom_title = metadata.custom_title;
    session.custom_summary = metadata.custom_summary;
    state.engine.update_session(&session).await?;
    state.engine.replace_manual_notes(&date, &metadata.manual_notes).await?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn delete_session(State(state): State<AppState>, Path(date): Path<String>) -> AppResult<Json<serde_json::Value>> {
    state.engine.delete_session(&date).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

async fn get_metadata(State(state): State<AppState>, Path(date): Path<String>) -> AppResult<Json<SessionMetadata>> {
    let session = state.engine.get_session(&date).await?;
    let notes = state.engine.get_manual_notes(&date).await?;
    Ok(Json(SessionMetadata {
        custom_title: session.custom_title,
        custom_summary: session.custom_summary,
        original_summary: session.original_summary,
        manual_notes: notes.into_iter().map(|n| n.content).collect(),
    }))
}

async fn get_blocks(
    State(state): State<AppState>,
    Path((date, app)): Path<(String, String)>,
) -> AppResult<Json<Vec<crate::storage::types::ActivityBlock>>> {
    Ok(Json(state.engine.get_activity_blocks(&date, &app).await?))
}

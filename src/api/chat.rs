// src/api/chat.rs
// Chat routes (spec §6, §4.10). AI unavailability is a genuine failure here
// (unlike search), so it surfaces as `500` rather than degrading silently.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::chat::{assemble_global_context, assemble_session_context};
use crate::error::AppError;
use crate::state::AppState;
use crate::storage::types::ChatMessage;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat", post(send_chat))
        .route("/api/chat/history", get(history))
}

#[derive(Deserialize)]
struct ChatRequest {
    context: String,
    message: String,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    role: &'static str,
    content: String,
    timestamp: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatSession {
    session_date: String,
    messages: Vec<ChatMessage>,
}

async fn send_chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let prompt = match build_prompt(&state, &req).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    let target_date = if req.context == "global" {
        req.session_id.clone().unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string())
    } else {
        req.context.clone()
    };

    if let Err(e) = state.engine.add_chat(&target_date, "user", &req.message, None).await {
        return e.into_response();
    }

    match state.ai.complete(&prompt).await {
        Ok(Some(content)) => {
            let _ = state.engine.add_chat(&target_date, "assistant", &content, None).await;
            Json(ChatResponse { role: "assistant", content, timestamp: Utc::now() }).into_response()
        }
        Ok(None) | Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "Unavailable: AI service is unreachable" })),
        )
            .into_response(),
    }
}

async fn build_prompt(state: &AppState, req: &ChatRequest) -> Result<String, AppError> {
    if req.context == "global" {
        let (sessions, _) = state.engine.list_sessions(1, u32::MAX).await?;
        let context = assemble_global_context(&req.message, sessions);
        Ok(format!("{context}\n\nQuestion: {}", req.message))
    } else {
        let blocks_by_app = state.engine.list_apps_for_session(&req.context).await?;
        let mut blocks = Vec::new();
        for app in blocks_by_app {
            blocks.extend(state.engine.get_activity_blocks(&req.context, &app).await?);
        }
        blocks.sort_by_key(|b| b.start_time);
        let context = assemble_session_context(&blocks, req.session_id.as_deref());
        Ok(format!("{context}\n\nQuestion: {}", req.message))
    }
}

async fn history(State(state): State<AppState>) -> Result<Json<Vec<ChatSession>>, AppError> {
    let dates = state.engine.list_session_dates().await?;
    let mut sessions = Vec::new();
    for date in dates {
        let messages = state.engine.get_chats(&date).await?;
        if !messages.is_empty() {
            sessions.push(ChatSession { session_date: date, messages });
        }
    }
    Ok(Json(sessions))
}

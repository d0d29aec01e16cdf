// src/api/auth.rs
// Bearer-token auth middleware (spec §6 supplemental detail: `api_secret.dat`
// guards every route except the static blob mount and `/api/health`).

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

pub async fn require_bearer_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = header.and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(t) if t == state.api_secret => next.run(request).await,
        _ => unauthorized(),
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "Validation: missing or invalid bearer token" })),
    )
        .into_response()
}

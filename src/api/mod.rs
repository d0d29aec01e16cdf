// src/api/mod.rs
// C8: HTTP API — localhost-only JSON surface over the Storage Engine
// (spec §4.8, §6). Every route requires a bearer token except the static
// blob mount and `/api/health`.

pub mod archives;
pub mod auth;
pub mod blacklist;
pub mod chat;
pub mod notifications;
pub mod profile;
pub mod search;
pub mod sessions;
pub mod status;

use axum::http::Method;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let protected = Router::new()
        .merge(sessions::router())
        .merge(search::router())
        .merge(blacklist::router())
        .merge(chat::router())
        .merge(archives::router())
        .merge(notifications::router())
        .merge(profile::router())
        .route("/api/status", get(status::get_status).post(status::set_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer_token));

    let public = Router::new()
        .route("/api/health", get(status::health))
        .nest_service("/images", ServeDir::new(state.engine.data_dir().join("files")));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

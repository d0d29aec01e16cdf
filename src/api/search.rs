// src/api/search.rs
// Full-text and semantic search routes (spec §6, §7).

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

const MAX_PAGE_SIZE: u32 = 100;
const MAX_TOP_K: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/search/fulltext", get(fulltext))
        .route("/api/search/semantic", get(semantic))
}

#[derive(Deserialize)]
struct FullTextParams {
    q: String,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    #[serde(rename = "pageSize")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

async fn fulltext(State(state): State<AppState>, Query(params): Query<FullTextParams>) -> Response {
    if params.page_size > MAX_PAGE_SIZE {
        return bad_request("pageSize must be <= 100");
    }
    match state.engine.full_text_search(&params.q, params.page, params.page_size).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
struct SemanticParams {
    q: String,
    #[serde(default = "default_top_k")]
    #[serde(rename = "topK")]
    top_k: usize,
    #[serde(rename = "startDate")]
    start_date: Option<String>,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
}

fn default_top_k() -> usize {
    10
}

async fn semantic(State(state): State<AppState>, Query(params): Query<SemanticParams>) -> Response {
    if params.top_k > MAX_TOP_K {
        return bad_request("topK must be <= 100");
    }

    let start = match parse_date(&params.start_date) {
        Ok(d) => d,
        Err(r) => return r,
    };
    let end = match parse_date(&params.end_date) {
        Ok(d) => d,
        Err(r) => return r,
    };

    match state.engine.semantic_search(&params.q, params.top_k, start, end).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => e.into_response(),
    }
}

fn parse_date(value: &Option<String>) -> Result<Option<NaiveDate>, Response> {
    match value {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| bad_request("dates must be YYYY-MM-DD")),
    }
}

fn bad_request(message: &str) -> Response {
    AppError::validation(message).into_response()
}

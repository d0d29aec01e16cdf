// src/api/profile.rs
// Profile image routes (spec §6): list, upload (content-sniffed, size-capped),
// delete (protecting the bundled `default_*.png` images).

use axum::extract::{Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::fs;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage::files::{sniff_image_mime, MAX_SCREENSHOT_BYTES};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/profile/images", get(list_images))
        .route("/api/profile/upload", post(upload))
        .route("/api/profile/delete", post(delete))
}

async fn profile_dir(state: &AppState) -> AppResult<std::path::PathBuf> {
    let dir = state.engine.data_dir().join("profile");
    fs::create_dir_all(&dir).await?;
    Ok(dir)
}

async fn list_images(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    let dir = profile_dir(&state).await?;
    let mut entries = fs::read_dir(&dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(Json(names))
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> AppResult<Json<serde_json::Value>> {
    let dir = profile_dir(&state).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("invalid multipart body: {e}")))?
    {
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::validation(format!("failed to read upload: {e}")))?;

        if bytes.len() > MAX_SCREENSHOT_BYTES {
            return Err(AppError::validation("upload exceeds 10MB limit"));
        }

        let sniff_window = &bytes[..bytes.len().min(512)];
        let extension = match sniff_image_mime(sniff_window) {
            Some("image/png") => "png",
            Some("image/jpeg") => "jpg",
            _ => return Err(AppError::validation("only PNG or JPEG images are accepted")),
        };

        let filename = format!("upload-{}.{}", unix_nanos(), extension);
        fs::write(dir.join(&filename), &bytes).await?;

        return Ok(Json(serde_json::json!({ "filename": filename, "status": "ok" })));
    }

    Err(AppError::validation("multipart body contained no file field"))
}

#[derive(Deserialize)]
struct DeleteRequest {
    filename: String,
}

async fn delete(State(state): State<AppState>, Json(req): Json<DeleteRequest>) -> AppResult<Json<serde_json::Value>> {
    if req.filename.starts_with("default_") {
        return Err(AppError::validation("default profile images cannot be deleted"));
    }
    if req.filename.contains('/') || req.filename.contains('\\') || req.filename.contains("..") {
        return Err(AppError::validation("invalid filename"));
    }

    let dir = profile_dir(&state).await?;
    let path = dir.join(&req.filename);
    match fs::remove_file(&path).await {
        Ok(()) => Ok(Json(serde_json::json!({ "status": "ok" }))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::not_found("image not found")),
        Err(e) => Err(e.into()),
    }
}

fn unix_nanos() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

// src/storage/types.rs
// Data model entities (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One calendar day's worth of captured activity for the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// `YYYY-MM-DD`, unique.
    pub date: String,
    pub title: String,
    pub summary: String,
    pub custom_title: Option<String>,
    pub custom_summary: Option<String>,
    /// First AI-written summary, preserved even after user edits.
    pub original_summary: String,
    /// Concatenated, bounded text used as the embedding source.
    pub extracted_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// How a block's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    Accessibility,
    Ocr,
    Hybrid,
}

/// A bounded time-window of activity on one app within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBlock {
    pub id: String,
    pub session_date: String,
    pub app_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub micro_summary: String,
    pub ocr_text: String,
    pub screenshot_refs: Vec<FileRef>,
    pub is_pending: bool,
    pub capture_source: Option<CaptureSource>,
}

/// Pointer to an on-disk blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    /// Relative, deterministic path under the data root.
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub encrypted: bool,
}

/// Embedding for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    pub session_date: String,
    pub vector: Vec<f32>,
    pub text_hash: String,
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManualNote {
    pub id: i64,
    pub session_date: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Archive {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveItem {
    pub archive_name: String,
    pub session_date: String,
    pub moved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub channel: String,
    pub message: String,
    pub metadata: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub session_date: String,
    pub role: String,
    pub content: String,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub session_date: String,
    pub snippet: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub custom_title: Option<String>,
    pub custom_summary: Option<String>,
    #[serde(default)]
    pub original_summary: String,
    #[serde(default)]
    pub manual_notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    pub max_age_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub sql: &'static str,
    pub vector: &'static str,
    pub embedder: &'static str,
    pub disk: DiskHealth,
    pub migration: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskHealth {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

// src/storage/relational/mod.rs
// C3: Relational Store — embedded SQL engine (WAL mode, foreign keys
// enforced) holding sessions, activity blocks, file refs, notes, archives,
// notifications, and chats, mirrored by an FTS5 full-text index.

pub mod archives;
pub mod blocks;
pub mod chats;
pub mod files;
pub mod notes;
pub mod notifications;
pub mod search;
pub mod sessions;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::error::AppResult;

/// A date key must look like `YYYY-MM-DD`.
pub fn validate_date(date: &str) -> AppResult<()> {
    let valid = date.len() == 10
        && date.as_bytes()[4] == b'-'
        && date.as_bytes()[7] == b'-'
        && date[..4].chars().all(|c| c.is_ascii_digit())
        && date[5..7].chars().all(|c| c.is_ascii_digit())
        && date[8..10].chars().all(|c| c.is_ascii_digit())
        && chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok();

    if valid {
        Ok(())
    } else {
        Err(crate::error::AppError::validation(format!(
            "invalid session date: {date}"
        )))
    }
}

/// Embedded SQL store. Reads may run from any clone of the pool; the engine
/// above is responsible for ensuring there is effectively one writer at a
/// time per spec §5 ("exactly one writer to the Relational Store").
#[derive(Clone)]
pub struct RelationalStore {
    pool: SqlitePool,
}

impl RelationalStore {
    pub async fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            db_path.display()
        ))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("relational store opened at {}", db_path.display());
        Ok(store)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    date TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    summary TEXT NOT NULL DEFAULT '',
    custom_title TEXT,
    custom_summary TEXT,
    original_summary TEXT NOT NULL DEFAULT '',
    extracted_text TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS activity_blocks (
    id TEXT PRIMARY KEY,
    session_date TEXT NOT NULL REFERENCES sessions(date) ON DELETE CASCADE,
    app_name TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    micro_summary TEXT NOT NULL DEFAULT '',
    ocr_text TEXT NOT NULL DEFAULT '',
    is_pending INTEGER NOT NULL DEFAULT 1,
    capture_source TEXT
);
CREATE INDEX IF NOT EXISTS idx_blocks_session_app ON activity_blocks(session_date, app_name, start_time);

CREATE TABLE IF NOT EXISTS file_refs (
    path TEXT PRIMARY KEY,
    session_date TEXT NOT NULL REFERENCES sessions(date) ON DELETE CASCADE,
    block_id TEXT REFERENCES activity_blocks(id) ON DELETE CASCADE,
    sha256 TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    encrypted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_file_refs_session ON file_refs(session_date);

CREATE TABLE IF NOT EXISTS manual_notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_date TEXT NOT NULL REFERENCES sessions(date) ON DELETE CASCADE,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS archives (
    name TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS archive_items (
    archive_name TEXT NOT NULL REFERENCES archives(name) ON DELETE CASCADE,
    session_date TEXT NOT NULL REFERENCES sessions(date) ON DELETE CASCADE,
    moved_at INTEGER NOT NULL,
    PRIMARY KEY (archive_name, session_date)
);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel TEXT NOT NULL,
    message TEXT NOT NULL,
    metadata TEXT,
    read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_channel ON notifications(channel, created_at);

CREATE TABLE IF NOT EXISTS chats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_date TEXT NOT NULL REFERENCES sessions(date) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chats_session ON chats(session_date, created_at);

CREATE VIRTUAL TABLE IF NOT EXISTS sessions_fts USING fts5(
    date UNINDEXED,
    title,
    summary,
    extracted_text,
    tokenize = 'porter unicode61'
);

CREATE VIRTUAL TABLE IF NOT EXISTS blocks_fts USING fts5(
    block_id UNINDEXED,
    session_date UNINDEXED,
    micro_summary,
    ocr_text,
    tokenize = 'porter unicode61'
);
"#;

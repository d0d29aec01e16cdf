// src/storage/relational/archives.rs
// Named archive collections that sessions can be moved into (spec §3).

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::RelationalStore;
use crate::error::{AppError, AppResult};
use crate::storage::types::Archive;

impl RelationalStore {
    pub async fn create_archive(&self, name: &str) -> AppResult<Archive> {
        if name.trim().is_empty() {
            return Err(AppError::validation("archive name must not be empty"));
        }

        let existing: Option<i64> = sqlx::query_scalar("SELECT 1 FROM archives WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        if existing.is_some() {
            return Err(AppError::already_exists(format!("archive {name} already exists")));
        }

        let created_at = Utc::now();
        sqlx::query("INSERT INTO archives (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(created_at.timestamp())
            .execute(self.pool())
            .await?;

        Ok(Archive {
            name: name.to_string(),
            created_at,
        })
    }

    pub async fn list_archives(&self) -> AppResult<Vec<Archive>> {
        let rows = sqlx::query("SELECT * FROM archives ORDER BY created_at DESC")
            .fetch_all(self.pool())
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Archive {
                    name: row.try_get("name")?,
                    created_at: DateTime::from_timestamp(row.try_get::<i64, _>("created_at")?, 0)
                        .unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }

    /// Moves a session into an archive, creating the archive if it doesn't
    /// yet exist. Idempotent: moving the same session twice is a no-op.
    pub async fn move_to_archive(&self, archive_name: &str, session_date: &str) -> AppResult<()> {
        super::validate_date(session_date)?;
        self.get_session(session_date).await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM archives WHERE name = ?")
            .bind(archive_name)
            .fetch_optional(self.pool())
            .await?;
        if exists.is_none() {
            self.create_archive(archive_name).await?;
        }

        sqlx::query(
            "INSERT OR REPLACE INTO archive_items (archive_name, session_date, moved_at) VALUES (?, ?, ?)",
        )
        .bind(archive_name)
        .bind(session_date)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn list_archive_sessions(&self, archive_name: &str) -> AppResult<Vec<String>> {
        let dates: Vec<String> = sqlx::query_scalar(
            "SELECT session_date FROM archive_items WHERE archive_name = ? ORDER BY moved_at DESC",
        )
        .bind(archive_name)
        .fetch_all(self.pool())
        .await?;
        Ok(dates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_list() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_archive("2024-projects").await.unwrap();
        let archives = store.list_archives().await.unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].name, "2024-projects");
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_archive("2024-projects").await.unwrap();
        let err = store.create_archive("2024-projects").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn move_to_archive_creates_archive_implicitly() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        store.move_to_archive("misc", "2024-03-14").await.unwrap();

        let sessions = store.list_archive_sessions("misc").await.unwrap();
        assert_eq!(sessions, vec!["2024-03-14".to_string()]);
    }

    #[tokio::test]
    async fn move_twice_is_idempotent() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        store.move_to_archive("misc", "2024-03-14").await.unwrap();
        store.move_to_archive("misc", "2024-03-14").await.unwrap();

        let sessions = store.list_archive_sessions("misc").await.unwrap();
        assert_eq!(sessions.len(), 1);
    }
}

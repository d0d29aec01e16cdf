// src/storage/relational/notes.rs
// Personal notes attached to a session date (spec §3), surfaced in session
// metadata and exported under the Markdown "Personal Notes" section.

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::RelationalStore;
use crate::error::AppResult;
use crate::storage::types::ManualNote;

fn row_to_note(row: &sqlx::sqlite::SqliteRow) -> AppResult<ManualNote> {
    Ok(ManualNote {
        id: row.try_get("id")?,
        session_date: row.try_get("session_date")?,
        content: row.try_get("content")?,
        created_at: DateTime::from_timestamp(row.try_get::<i64, _>("created_at")?, 0)
            .unwrap_or_else(Utc::now),
    })
}

impl RelationalStore {
    pub async fn add_manual_note(&self, session_date: &str, content: &str) -> AppResult<i64> {
        super::validate_date(session_date)?;
        self.get_or_create_session(session_date).await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO manual_notes (session_date, content, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(session_date)
        .bind(content)
        .bind(Utc::now().timestamp())
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    /// Ordered oldest-first, matching the order notes were jotted down.
    pub async fn get_manual_notes(&self, session_date: &str) -> AppResult<Vec<ManualNote>> {
        super::validate_date(session_date)?;

        let rows = sqlx::query(
            "SELECT * FROM manual_notes WHERE session_date = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(session_date)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_note).collect()
    }

    pub async fn delete_manual_note(&self, id: i64) -> AppResult<()> {
        sqlx::query("DELETE FROM manual_notes WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Replaces every note for `session_date` with `contents`, preserving order.
    /// Used by the session metadata PUT route, whose body carries the full
    /// desired note list rather than incremental add/remove operations.
    pub async fn replace_manual_notes(&self, session_date: &str, contents: &[String]) -> AppResult<()> {
        super::validate_date(session_date)?;
        self.get_or_create_session(session_date).await?;

        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM manual_notes WHERE session_date = ?")
            .bind(session_date)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now().timestamp();
        for content in contents {
            sqlx::query(
                "INSERT INTO manual_notes (session_date, content, created_at) VALUES (?, ?, ?)",
            )
            .bind(session_date)
            .bind(content)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_list_oldest_first() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.add_manual_note("2024-03-14", "remember to follow up").await.unwrap();
        store.add_manual_note("2024-03-14", "second note").await.unwrap();

        let notes = store.get_manual_notes("2024-03-14").await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].content, "remember to follow up");
        assert_eq!(notes[1].content, "second note");
    }

    #[tokio::test]
    async fn delete_removes_note() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        let id = store.add_manual_note("2024-03-14", "temp").await.unwrap();
        store.delete_manual_note(id).await.unwrap();
        assert!(store.get_manual_notes("2024-03-14").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_overwrites_prior_set() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.add_manual_note("2024-03-14", "stale").await.unwrap();

        store
            .replace_manual_notes("2024-03-14", &["fresh one".to_string(), "fresh two".to_string()])
            .await
            .unwrap();

        let notes = store.get_manual_notes("2024-03-14").await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].content, "fresh one");
        assert_eq!(notes[1].content, "fresh two");
    }
}

// src/storage/relational/chats.rs
// Chat transcript per session date (spec §3, C10 consumes GetChats).

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::RelationalStore;
use crate::error::AppResult;
use crate::storage::types::ChatMessage;

fn row_to_chat(row: &sqlx::sqlite::SqliteRow) -> AppResult<ChatMessage> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        session_date: row.try_get("session_date")?,
        role: row.try_get("role")?,
        content: row.try_get("content")?,
        metadata: row.try_get("metadata")?,
        created_at: DateTime::from_timestamp(row.try_get::<i64, _>("created_at")?, 0)
            .unwrap_or_else(Utc::now),
    })
}

impl RelationalStore {
    pub async fn add_chat(
        &self,
        session_date: &str,
        role: &str,
        content: &str,
        metadata: Option<&str>,
    ) -> AppResult<i64> {
        super::validate_date(session_date)?;
        self.get_or_create_session(session_date).await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO chats (session_date, role, content, metadata, created_at) VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(session_date)
        .bind(role)
        .bind(content)
        .bind(metadata)
        .bind(Utc::now().timestamp())
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    /// Ordered oldest-first, matching conversational reading order.
    pub async fn get_chats(&self, session_date: &str) -> AppResult<Vec<ChatMessage>> {
        super::validate_date(session_date)?;

        let rows = sqlx::query(
            "SELECT * FROM chats WHERE session_date = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(session_date)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_chat).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_list_oldest_first() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.add_chat("2024-03-14", "user", "hello", None).await.unwrap();
        store
            .add_chat("2024-03-14", "assistant", "hi there", Some(r#"{"model":"x"}"#))
            .await
            .unwrap();

        let chats = store.get_chats("2024-03-14").await.unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].content, "hello");
        assert_eq!(chats[1].role, "assistant");
        assert_eq!(chats[1].metadata.as_deref(), Some(r#"{"model":"x"}"#));
    }

    #[tokio::test]
    async fn add_chat_creates_session_if_missing() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.add_chat("2024-03-14", "user", "hello", None).await.unwrap();
        store.get_session("2024-03-14").await.unwrap();
    }
}

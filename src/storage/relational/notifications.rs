// src/storage/relational/notifications.rs
// Per-channel FIFO notification log, capped at 100 entries (spec §3).

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::RelationalStore;
use crate::error::AppResult;
use crate::storage::types::Notification;

const MAX_PER_CHANNEL: i64 = 100;

fn row_to_notification(row: &sqlx::sqlite::SqliteRow) -> AppResult<Notification> {
    Ok(Notification {
        id: row.try_get("id")?,
        channel: row.try_get("channel")?,
        message: row.try_get("message")?,
        metadata: row.try_get("metadata")?,
        read: row.try_get::<i64, _>("read")? != 0,
        created_at: DateTime::from_timestamp(row.try_get::<i64, _>("created_at")?, 0)
            .unwrap_or_else(Utc::now),
    })
}

impl RelationalStore {
    /// Appends a notification, then evicts the oldest entries in the same
    /// channel beyond the 100-entry cap.
    pub async fn add_notification(
        &self,
        channel: &str,
        message: &str,
        metadata: Option<&str>,
    ) -> AppResult<i64> {
        let mut tx = self.pool().begin().await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO notifications (channel, message, metadata, read, created_at) VALUES (?, ?, ?, 0, ?) RETURNING id",
        )
        .bind(channel)
        .bind(message)
        .bind(metadata)
        .bind(Utc::now().timestamp())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM notifications
            WHERE channel = ? AND id NOT IN (
                SELECT id FROM notifications WHERE channel = ? ORDER BY created_at DESC LIMIT ?
            )
            "#,
        )
        .bind(channel)
        .bind(channel)
        .bind(MAX_PER_CHANNEL)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Newest first, per channel.
    pub async fn get_notifications(&self, channel: &str) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE channel = ? ORDER BY created_at DESC",
        )
        .bind(channel)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_notification).collect()
    }

    pub async fn mark_notifications_read(&self, ids: &[i64]) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool().begin().await?;
        for id in ids {
            sqlx::query("UPDATE notifications SET read = 1 WHERE id = ?")
                .bind(id)
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
    async fn add_then_list_newest_first() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.add_notification("capture", "first", None).await.unwrap();
        store.add_notification("capture", "second", None).await.unwrap();

        let notifications = store.get_notifications("capture").await.unwrap();
        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications[0].message, "second");
        assert_eq!(notifications[1].message, "first");
    }

    #[tokio::test]
    async fn evicts_beyond_cap() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        for i in 0..120 {
            store
                .add_notification("capture", &format!("msg-{i}"), None)
                .await
                .unwrap();
        }
        let notifications = store.get_notifications("capture").await.unwrap();
        assert_eq!(notifications.len(), 100);
        assert_eq!(notifications[0].message, "msg-119");
    }

    #[tokio::test]
    async fn mark_read_flips_flag() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        let id = store.add_notification("capture", "hello", None).await.unwrap();
        store.mark_notifications_read(&[id]).await.unwrap();
        let notifications = store.get_notifications("capture").await.unwrap();
        assert!(notifications[0].read);
    }
}

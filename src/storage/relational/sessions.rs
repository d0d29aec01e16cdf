// src/storage/relational/sessions.rs
// CRUD for sessions, with full-text index kept in sync in the same
// transaction as the base row write (spec §4.3, §5 "read-your-writes").

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use super::RelationalStore;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::storage::types::Session;

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> AppResult<Session> {
    let tags_json: String = row.try_get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

    Ok(Session {
        date: row.try_get("date")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        custom_title: row.try_get("custom_title")?,
        custom_summary: row.try_get("custom_summary")?,
        original_summary: row.try_get("original_summary")?,
        extracted_text: row.try_get("extracted_text")?,
        created_at: DateTime::from_timestamp(row.try_get::<i64, _>("created_at")?, 0)
            .unwrap_or_else(Utc::now),
        updated_at: DateTime::from_timestamp(row.try_get::<i64, _>("updated_at")?, 0)
            .unwrap_or_else(Utc::now),
        tags,
    })
}

async fn sync_fts(tx: &mut Transaction<'_, Sqlite>, session: &Session) -> AppResult<()> {
    sqlx::query("DELETE FROM sessions_fts WHERE date = ?")
        .bind(&session.date)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        "INSERT INTO sessions_fts (date, title, summary, extracted_text) VALUES (?, ?, ?, ?)",
    )
    .bind(&session.date)
    .bind(&session.title)
    .bind(&session.summary)
    .bind(&session.extracted_text)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

impl RelationalStore {
    pub async fn create_session(&self, date: &str) -> AppResult<Session> {
        super::validate_date(date)?;

        let exists = self.get_session(date).await.is_ok();
        if exists {
            return Err(AppError::already_exists(format!(
                "session {date} already exists"
            )));
        }

        let now = Utc::now();
        let session = Session {
            date: date.to_string(),
            title: String::new(),
            summary: String::new(),
            custom_title: None,
            custom_summary: None,
            original_summary: String::new(),
            extracted_text: String::new(),
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
        };

        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"
            INSERT INTO sessions (date, title, summary, custom_title, custom_summary,
                original_summary, extracted_text, tags, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.date)
        .bind(&session.title)
        .bind(&session.summary)
        .bind(&session.custom_title)
        .bind(&session.custom_summary)
        .bind(&session.original_summary)
        .bind(&session.extracted_text)
        .bind(serde_json::to_string(&session.tags)?)
        .bind(session.created_at.timestamp())
        .bind(session.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        sync_fts(&mut tx, &session).await?;
        tx.commit().await?;

        debug!("created session {date}");
        Ok(session)
    }

    /// Create the session if it doesn't exist yet, otherwise return the
    /// existing one (used by the capture pipeline on first focus of a day).
    pub async fn get_or_create_session(&self, date: &str) -> AppResult<Session> {
        match self.get_session(date).await {
            Ok(session) => Ok(session),
            Err(e) if e.kind() == ErrorKind::NotFound => self.create_session(date).await,
            Err(e) => Err(e),
        }
    }

    pub async fn get_session(&self, date: &str) -> AppResult<Session> {
        super::validate_date(date)?;

        let row = sqlx::query("SELECT * FROM sessions WHERE date = ?")
            .bind(date)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| AppError::not_found(format!("session {date} not found")))?;

        row_to_session(&row)
    }

    pub async fn update_session(&self, session: &Session) -> AppResult<()> {
        super::validate_date(&session.date)?;
        self.get_session(&session.date).await?;

        let mut updated = session.clone();
        updated.updated_at = Utc::now();

        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"
            UPDATE sessions SET
                title = ?, summary = ?, custom_title = ?, custom_summary = ?,
                original_summary = ?, extracted_text = ?, tags = ?, updated_at = ?
            WHERE date = ?
            "#,
        )
        .bind(&updated.title)
        .bind(&updated.summary)
        .bind(&updated.custom_title)
        .bind(&updated.custom_summary)
        .bind(&updated.original_summary)
        .bind(&updated.extracted_text)
        .bind(serde_json::to_string(&updated.tags)?)
        .bind(updated.updated_at.timestamp())
        .bind(&updated.date)
        .execute(&mut *tx)
        .await?;

        sync_fts(&mut tx, &updated).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Returns the set of `file_refs.path` owned by the session, so the
    /// caller can unlink blobs after the SQL transaction commits (spec §4.5
    /// saga: SQL delete commits first, blob unlink is best-effort after).
    pub async fn delete_session(&self, date: &str) -> AppResult<Vec<String>> {
        super::validate_date(date)?;
        self.get_session(date).await?;

        let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM file_refs WHERE session_date = ?")
            .bind(date)
            .fetch_all(self.pool())
            .await?;

        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM sessions_fts WHERE date = ?")
            .bind(date)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM blocks_fts WHERE session_date = ?")
            .bind(date)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE date = ?")
            .bind(date)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(paths)
    }

    pub async fn list_sessions(&self, page: u32, page_size: u32) -> AppResult<(Vec<Session>, u64)> {
        if page == 0 || page_size == 0 {
            return Err(AppError::validation("page and pageSize must be >= 1"));
        }

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(self.pool())
            .await?;

        let offset = (page - 1) as i64 * page_size as i64;
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY date DESC LIMIT ? OFFSET ?")
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;

        let sessions = rows.iter().map(row_to_session).collect::<AppResult<Vec<_>>>()?;
        Ok((sessions, total as u64))
    }

    /// All session dates, newest first — backs `GET /api/sessions`.
    pub async fn list_session_dates(&self) -> AppResult<Vec<String>> {
        let dates: Vec<String> =
            sqlx::query_scalar("SELECT date FROM sessions ORDER BY date DESC")
                .fetch_all(self.pool())
                .await?;
        Ok(dates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        let session = store.get_session("2024-03-14").await.unwrap();
        assert_eq!(session.date, "2024-03-14");
        assert_eq!(session.original_summary, "");
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        let err = store.create_session("2024-03-14").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn rejects_malformed_date() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        let err = store.create_session("03-14-2024").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn update_preserves_original_summary_distinct_from_custom() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        let mut session = store.create_session("2024-03-14").await.unwrap();
        session.original_summary = "ai wrote this".to_string();
        session.custom_summary = Some("user wrote this".to_string());
        store.update_session(&session).await.unwrap();

        let fetched = store.get_session("2024-03-14").await.unwrap();
        assert_eq!(fetched.original_summary, "ai wrote this");
        assert_eq!(fetched.custom_summary.as_deref(), Some("user wrote this"));
    }

    #[tokio::test]
    async fn list_sessions_orders_newest_first() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-10").await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        store.create_session("2024-03-12").await.unwrap();

        let (sessions, total) = store.list_sessions(1, 10).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(
            sessions.iter().map(|s| s.date.as_str()).collect::<Vec<_>>(),
            vec!["2024-03-14", "2024-03-12", "2024-03-10"]
        );
    }

    #[tokio::test]
    async fn delete_session_returns_owned_file_paths() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        sqlx::query(
            "INSERT INTO file_refs (path, session_date, sha256, size_bytes, mime_type, encrypted) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind("files/2024-03-14/a.png")
        .bind("2024-03-14")
        .bind("deadbeef")
        .bind(10_i64)
        .bind("image/png")
        .bind(0_i64)
        .execute(store.pool())
        .await
        .unwrap();

        let paths = store.delete_session("2024-03-14").await.unwrap();
        assert_eq!(paths, vec!["files/2024-03-14/a.png".to_string()]);
        assert_eq!(store.get_session("2024-03-14").await.unwrap_err().kind(), ErrorKind::NotFound);
    }
}

// src/storage/relational/blocks.rs
// CRUD for activity blocks (spec §3, §4.3): non-overlapping, strictly
// ordered by start_time within (session_date, app_name).

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::RelationalStore;
use crate::error::{AppError, AppResult};
use crate::storage::types::{ActivityBlock, CaptureSource, FileRef};

fn capture_source_str(cs: Option<CaptureSource>) -> Option<&'static str> {
    cs.map(|c| match c {
        CaptureSource::Accessibility => "accessibility",
        CaptureSource::Ocr => "ocr",
        CaptureSource::Hybrid => "hybrid",
    })
}

fn parse_capture_source(s: Option<String>) -> Option<CaptureSource> {
    match s.as_deref() {
        Some("accessibility") => Some(CaptureSource::Accessibility),
        Some("ocr") => Some(CaptureSource::Ocr),
        Some("hybrid") => Some(CaptureSource::Hybrid),
        _ => None,
    }
}

async fn file_refs_for_block(
    store: &RelationalStore,
    block_id: &str,
) -> AppResult<Vec<FileRef>> {
    let rows = sqlx::query("SELECT * FROM file_refs WHERE block_id = ? ORDER BY path")
        .bind(block_id)
        .fetch_all(store.pool())
        .await?;

    rows.iter()
        .map(|row| {
            Ok(FileRef {
                path: row.try_get("path")?,
                sha256: row.try_get("sha256")?,
                size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
                mime_type: row.try_get("mime_type")?,
                encrypted: row.try_get::<i64, _>("encrypted")? != 0,
            })
        })
        .collect::<AppResult<Vec<_>>>()
}

fn row_to_block(row: &sqlx::sqlite::SqliteRow) -> AppResult<ActivityBlock> {
    Ok(ActivityBlock {
        id: row.try_get("id")?,
        session_date: row.try_get("session_date")?,
        app_name: row.try_get("app_name")?,
        start_time: DateTime::from_timestamp(row.try_get::<i64, _>("start_time")?, 0)
            .unwrap_or_else(Utc::now),
        end_time: DateTime::from_timestamp(row.try_get::<i64, _>("end_time")?, 0)
            .unwrap_or_else(Utc::now),
        micro_summary: row.try_get("micro_summary")?,
        ocr_text: row.try_get("ocr_text")?,
        screenshot_refs: Vec::new(),
        is_pending: row.try_get::<i64, _>("is_pending")? != 0,
        capture_source: parse_capture_source(row.try_get("capture_source")?),
    })
}

impl RelationalStore {
    /// Inserts a new block, rejecting an interval that overlaps an existing
    /// one in the same `(session_date, app_name)` pair.
    pub async fn add_activity_block(
        &self,
        session_date: &str,
        app_name: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> AppResult<String> {
        super::validate_date(session_date)?;
        self.get_session(session_date).await?;

        if end_time <= start_time {
            return Err(AppError::validation("block endTime must be after startTime"));
        }

        let overlap: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM activity_blocks
            WHERE session_date = ? AND app_name = ?
              AND start_time < ? AND end_time > ?
            LIMIT 1
            "#,
        )
        .bind(session_date)
        .bind(app_name)
        .bind(end_time.timestamp())
        .bind(start_time.timestamp())
        .fetch_optional(self.pool())
        .await?;

        if overlap.is_some() {
            return Err(AppError::validation("activity block overlaps an existing block"));
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO activity_blocks
                (id, session_date, app_name, start_time, end_time, micro_summary, ocr_text, is_pending, capture_source)
            VALUES (?, ?, ?, ?, ?, '', '', 1, NULL)
            "#,
        )
        .bind(&id)
        .bind(session_date)
        .bind(app_name)
        .bind(start_time.timestamp())
        .bind(end_time.timestamp())
        .execute(self.pool())
        .await?;

        Ok(id)
    }

    /// Ordered by `startTime` ascending.
    pub async fn get_activity_blocks(
        &self,
        session_date: &str,
        app_name: &str,
    ) -> AppResult<Vec<ActivityBlock>> {
        super::validate_date(session_date)?;
        self.get_session(session_date).await?;

        let rows = sqlx::query(
            "SELECT * FROM activity_blocks WHERE session_date = ? AND app_name = ? ORDER BY start_time ASC",
        )
        .bind(session_date)
        .bind(app_name)
        .fetch_all(self.pool())
        .await?;

        let mut blocks = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut block = row_to_block(row)?;
            block.screenshot_refs = file_refs_for_block(self, &block.id).await?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// App names with activity in `session_date`, most-recent activity first.
    pub async fn list_apps_for_session(&self, session_date: &str) -> AppResult<Vec<String>> {
        super::validate_date(session_date)?;
        self.get_session(session_date).await?;

        let apps: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT app_name FROM activity_blocks
            WHERE session_date = ?
            GROUP BY app_name
            ORDER BY MAX(start_time) DESC
            "#,
        )
        .bind(session_date)
        .fetch_all(self.pool())
        .await?;

        Ok(apps)
    }

    /// Seal a block: append OCR text/micro-summary and mark it no longer
    /// pending. Also refreshes the block's row in the FTS index.
    pub async fn seal_activity_block(
        &self,
        block_id: &str,
        micro_summary: &str,
        ocr_text_append: &str,
        capture_source: Option<CaptureSource>,
    ) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            UPDATE activity_blocks SET
                micro_summary = ?,
                ocr_text = ocr_text || ?,
                is_pending = 0,
                capture_source = COALESCE(?, capture_source)
            WHERE id = ?
            "#,
        )
        .bind(micro_summary)
        .bind(ocr_text_append)
        .bind(capture_source_str(capture_source))
        .bind(block_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT session_date, micro_summary, ocr_text FROM activity_blocks WHERE id = ?")
            .bind(block_id)
            .fetch_one(&mut *tx)
            .await?;
        let session_date: String = row.try_get("session_date")?;
        let micro_summary: String = row.try_get("micro_summary")?;
        let ocr_text: String = row.try_get("ocr_text")?;

        sqlx::query("DELETE FROM blocks_fts WHERE block_id = ?")
            .bind(block_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO blocks_fts (block_id, session_date, micro_summary, ocr_text) VALUES (?, ?, ?, ?)",
        )
        .bind(block_id)
        .bind(&session_date)
        .bind(&micro_summary)
        .bind(&ocr_text)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Folds an observed `capture_source` into the block's column without
    /// touching `ocr_text`/`micro_summary`/`is_pending`: `NULL` → observed,
    /// observed == existing → unchanged, otherwise `hybrid`. Used by OCR
    /// worker-pool completions, which may land after the block has sealed.
    pub async fn merge_capture_source(&self, block_id: &str, source: CaptureSource) -> AppResult<()> {
        let observed = capture_source_str(Some(source));
        sqlx::query(
            r#"
            UPDATE activity_blocks SET
                capture_source = CASE
                    WHEN capture_source IS NULL THEN ?
                    WHEN capture_source = ? THEN capture_source
                    ELSE 'hybrid'
                END
            WHERE id = ?
            "#,
        )
        .bind(observed)
        .bind(observed)
        .bind(block_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Append OCR text to a still-open block without sealing it (called
    /// repeatedly by the OCR worker pool while the block is active).
    pub async fn append_block_ocr_text(&self, block_id: &str, text: &str) -> AppResult<()> {
        if text.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE activity_blocks SET ocr_text = ocr_text || ? WHERE id = ?")
            .bind(text)
            .bind(block_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Any block still `is_pending` gets its pending flag cleared with an
    /// empty summary on startup (spec §5 "compensating pass").
    pub async fn clear_stale_pending_blocks(&self) -> AppResult<u64> {
        let result = sqlx::query("UPDATE activity_blocks SET is_pending = 0, micro_summary = '' WHERE is_pending = 1")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn register_file_ref(
        &self,
        session_date: &str,
        block_id: Option<&str>,
        file_ref: &FileRef,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO file_refs (path, session_date, block_id, sha256, size_bytes, mime_type, encrypted)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file_ref.path)
        .bind(session_date)
        .bind(block_id)
        .bind(&file_ref.sha256)
        .bind(file_ref.size_bytes as i64)
        .bind(&file_ref.mime_type)
        .bind(file_ref.encrypted as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn unregister_file_ref(&self, path: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM file_refs WHERE path = ?")
            .bind(path)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn blocks_are_ordered_by_start_time() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        let t0 = Utc::now();

        let second = store
            .add_activity_block("2024-03-14", "Chrome", t0 + Duration::minutes(5), t0 + Duration::minutes(9))
            .await
            .unwrap();
        let first = store
            .add_activity_block("2024-03-14", "Chrome", t0, t0 + Duration::minutes(4))
            .await
            .unwrap();

        let blocks = store.get_activity_blocks("2024-03-14", "Chrome").await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].id, first);
        assert_eq!(blocks[1].id, second);
        assert!(blocks[0].start_time < blocks[1].start_time);
    }

    #[tokio::test]
    async fn rejects_overlapping_block() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        let t0 = Utc::now();

        store
            .add_activity_block("2024-03-14", "Chrome", t0, t0 + Duration::minutes(10))
            .await
            .unwrap();
        let err = store
            .add_activity_block("2024-03-14", "Chrome", t0 + Duration::minutes(5), t0 + Duration::minutes(15))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn rejects_inverted_interval() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        let t0 = Utc::now();
        let err = store
            .add_activity_block("2024-03-14", "Chrome", t0, t0 - Duration::seconds(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn seal_marks_not_pending_and_appends_ocr() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        let t0 = Utc::now();
        let id = store
            .add_activity_block("2024-03-14", "Chrome", t0, t0 + Duration::minutes(1))
            .await
            .unwrap();

        store
            .seal_activity_block(&id, "browsed docs", "hello world", Some(CaptureSource::Ocr))
            .await
            .unwrap();

        let blocks = store.get_activity_blocks("2024-03-14", "Chrome").await.unwrap();
        assert!(!blocks[0].is_pending);
        assert_eq!(blocks[0].micro_summary, "browsed docs");
        assert_eq!(blocks[0].ocr_text, "hello world");
        assert_eq!(blocks[0].capture_source, Some(CaptureSource::Ocr));
    }

    #[tokio::test]
    async fn merge_capture_source_fills_null_then_upgrades_to_hybrid() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        let t0 = Utc::now();
        let id = store
            .add_activity_block("2024-03-14", "Chrome", t0, t0 + Duration::minutes(1))
            .await
            .unwrap();

        store.merge_capture_source(&id, CaptureSource::Accessibility).await.unwrap();
        let blocks = store.get_activity_blocks("2024-03-14", "Chrome").await.unwrap();
        assert_eq!(blocks[0].capture_source, Some(CaptureSource::Accessibility));

        store.merge_capture_source(&id, CaptureSource::Accessibility).await.unwrap();
        let blocks = store.get_activity_blocks("2024-03-14", "Chrome").await.unwrap();
        assert_eq!(blocks[0].capture_source, Some(CaptureSource::Accessibility));

        store.merge_capture_source(&id, CaptureSource::Ocr).await.unwrap();
        let blocks = store.get_activity_blocks("2024-03-14", "Chrome").await.unwrap();
        assert_eq!(blocks[0].capture_source, Some(CaptureSource::Hybrid));
    }
}

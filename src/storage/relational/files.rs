// src/storage/relational/files.rs
// Read-side queries over `file_refs`. Writes (register/unregister) live in
// blocks.rs alongside the block they're attached to.

use sqlx::Row;

use super::RelationalStore;
use crate::error::{AppError, AppResult};
use crate::storage::types::FileRef;

fn row_to_file_ref(row: &sqlx::sqlite::SqliteRow) -> AppResult<FileRef> {
    Ok(FileRef {
        path: row.try_get("path")?,
        sha256: row.try_get("sha256")?,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        mime_type: row.try_get("mime_type")?,
        encrypted: row.try_get::<i64, _>("encrypted")? != 0,
    })
}

impl RelationalStore {
    pub async fn get_file_ref(&self, path: &str) -> AppResult<FileRef> {
        let row = sqlx::query("SELECT * FROM file_refs WHERE path = ?")
            .bind(path)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| AppError::not_found(format!("file ref {path} not found")))?;
        row_to_file_ref(&row)
    }

    pub async fn list_file_refs_for_session(&self, session_date: &str) -> AppResult<Vec<FileRef>> {
        super::validate_date(session_date)?;
        let rows = sqlx::query("SELECT * FROM file_refs WHERE session_date = ? ORDER BY path")
            .bind(session_date)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_file_ref).collect()
    }

    /// All file paths in the database, used by the engine's startup sweep to
    /// find on-disk blobs with no owning row (orphans, spec §4.5).
    pub async fn list_all_file_paths(&self) -> AppResult<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM file_refs")
            .fetch_all(self.pool())
            .await?;
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::FileRef;

    #[tokio::test]
    async fn get_file_ref_round_trips() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        let file_ref = FileRef {
            path: "files/2024-03-14/Chrome/screenshots/10-00-00.png".to_string(),
            sha256: "deadbeef".to_string(),
            size_bytes: 1234,
            mime_type: "image/png".to_string(),
            encrypted: false,
        };
        store
            .register_file_ref("2024-03-14", None, &file_ref)
            .await
            .unwrap();

        let fetched = store.get_file_ref(&file_ref.path).await.unwrap();
        assert_eq!(fetched, file_ref);

        let listed = store.list_file_refs_for_session("2024-03-14").await.unwrap();
        assert_eq!(listed, vec![file_ref]);
    }

    #[tokio::test]
    async fn missing_file_ref_is_not_found() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        let err = store.get_file_ref("nope").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}

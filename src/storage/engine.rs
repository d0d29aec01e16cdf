// src/storage/engine.rs
// C5: Storage Engine — coordinates the Relational Store, File Store, and
// Vector Store under saga/compensation discipline (spec §4.5).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{info, warn};

use crate::ai::AiClient;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::storage::files::FileStore;
use crate::storage::relational::RelationalStore;
use crate::storage::types::{
    Archive, ChatMessage, DiskHealth, FileRef, HealthStatus, ManualNote, Notification,
    RetentionPolicy, SearchResult, Session,
};
use crate::storage::vector::VectorStore;

#[derive(Clone)]
pub struct StorageEngine {
    relational: RelationalStore,
    files: Arc<FileStore>,
    vector: VectorStore,
    ai: Arc<AiClient>,
    data_dir: PathBuf,
}

impl StorageEngine {
    pub async fn open(config: &Config, ai: Arc<AiClient>) -> AppResult<Self> {
        let relational = RelationalStore::open(&config.db_path()).await?;
        let files = Arc::new(FileStore::new(config.files_dir()));
        let vector = VectorStore::spawn(ai.clone(), config.embed_queue_depth, config.embed_max_attempts);

        let engine = Self {
            relational,
            files,
            vector,
            ai,
            data_dir: config.data_dir.clone(),
        };

        let cleared = engine.relational.clear_stale_pending_blocks().await?;
        if cleared > 0 {
            warn!("cleared {cleared} stale pending blocks left over from an unclean shutdown");
        }
        engine.sweep_orphaned_blobs().await?;

        Ok(engine)
    }

    /// Deletes on-disk blobs that have no owning `file_refs` row (spec §4.5
    /// startup sweep, the inverse of the invariant that a row always has a
    /// backing blob).
    async fn sweep_orphaned_blobs(&self) -> AppResult<()> {
        let owned: std::collections::HashSet<String> =
            self.relational.list_all_file_paths().await?.into_iter().collect();
        let on_disk = self.files.list_all_relative_paths().await?;

        let mut swept = 0;
        for path in on_disk {
            if path.starts_with(".tmp-") || !owned.contains(&path) {
                if self.files.delete(&path).await.is_ok() {
                    swept += 1;
                }
            }
        }
        if swept > 0 {
            info!("startup sweep removed {swept} orphaned blobs");
        }
        Ok(())
    }

    // --- Sessions -----------------------------------------------------

    pub async fn create_session(&self, date: &str) -> AppResult<Session> {
        self.relational.create_session(date).await
    }

    pub async fn get_or_create_session(&self, date: &str) -> AppResult<Session> {
        self.relational.get_or_create_session(date).await
    }

    pub async fn get_session(&self, date: &str) -> AppResult<Session> {
        self.relational.get_session(date).await
    }

    pub async fn update_session(&self, session: &Session) -> AppResult<()> {
        self.relational.update_session(session).await?;
        if !session.extracted_text.is_empty() {
            self.vector.upsert(&session.date, &session.extracted_text).await;
        }
        Ok(())
    }

    /// Deletes the session row (and cascades), then best-effort unlinks its
    /// blobs. The SQL deletion is authoritative and already committed by the
    /// time blob cleanup runs, matching the saga discipline in spec §4.5.
    pub async fn delete_session(&self, date: &str) -> AppResult<()> {
        let paths = self.relational.delete_session(date).await?;
        for path in paths {
            if let Err(e) = self.files.delete(&path).await {
                warn!("failed to unlink blob {path} after session delete: {e}");
            }
        }
        self.vector.remove(date).await;
        Ok(())
    }

    pub async fn list_sessions(&self, page: u32, page_size: u32) -> AppResult<(Vec<Session>, u64)> {
        self.relational.list_sessions(page, page_size).await
    }

    pub async fn list_session_dates(&self) -> AppResult<Vec<String>> {
        self.relational.list_session_dates().await
    }

    pub async fn list_apps_for_session(&self, date: &str) -> AppResult<Vec<String>> {
        self.relational.list_apps_for_session(date).await
    }

    /// Exposes the AI client for callers (e.g. the capture pipeline) that
    /// need to summarize text outside the session/search contract above.
    pub fn ai(&self) -> &Arc<AiClient> {
        &self.ai
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    // --- Activity blocks -----------------------------------------------

    pub async fn add_activity_block(
        &self,
        date: &str,
        app: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> AppResult<String> {
        self.relational.add_activity_block(date, app, start_time, end_time).await
    }

    pub async fn get_activity_blocks(&self, date: &str, app: &str) -> AppResult<Vec<crate::storage::types::ActivityBlock>> {
        self.relational.get_activity_blocks(date, app).await
    }

    pub async fn seal_activity_block(
        &self,
        block_id: &str,
        micro_summary: &str,
        ocr_text_append: &str,
        capture_source: Option<crate::storage::types::CaptureSource>,
    ) -> AppResult<()> {
        self.relational
            .seal_activity_block(block_id, micro_summary, ocr_text_append, capture_source)
            .await
    }

    pub async fn append_block_ocr_text(&self, block_id: &str, text: &str) -> AppResult<()> {
        self.relational.append_block_ocr_text(block_id, text).await
    }

    /// Folds an OCR worker-pool completion's `capture_source` into the
    /// block's row directly, independent of whether the block is still the
    /// pipeline's in-memory open block (it may have already sealed).
    pub async fn merge_block_capture_source(
        &self,
        block_id: &str,
        source: crate::storage::types::CaptureSource,
    ) -> AppResult<()> {
        self.relational.merge_capture_source(block_id, source).await
    }

    // --- Files -----------------------------------------------------------

    /// Writes the blob first (File Store), then registers the `file_refs`
    /// row; on registration failure the blob is unlinked (saga
    /// compensation, spec §4.5).
    pub async fn save_screenshot(
        &self,
        date: &str,
        app: &str,
        captured_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> AppResult<FileRef> {
        let file_ref = self.files.save_screenshot(date, app, captured_at, bytes).await?;

        if let Err(e) = self.relational.register_file_ref(date, None, &file_ref).await {
            warn!("rolling back screenshot blob {} after registration failure", file_ref.path);
            let _ = self.files.delete(&file_ref.path).await;
            return Err(e);
        }

        Ok(file_ref)
    }

    // --- Search ------------------------------------------------------

    pub async fn full_text_search(&self, query: &str, page: u32, page_size: u32) -> AppResult<Vec<SearchResult>> {
        let (results, _total) = self.relational.full_text_search(query, page, page_size).await?;
        Ok(results)
    }

    /// Graceful-degradation boundary: an `Unavailable` embedder yields an
    /// empty result list rather than propagating, per spec §7.
    pub async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> AppResult<Vec<SearchResult>> {
        match self.vector.query(&self.ai, query, top_k, date_from, date_to).await {
            Ok(scored) => Ok(scored
                .into_iter()
                .map(|(session_date, score)| SearchResult {
                    session_date,
                    snippet: String::new(),
                    score,
                })
                .collect()),
            Err(e) if e.kind() == crate::error::ErrorKind::Unavailable => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn enqueue_embedding(&self, session_date: &str, text: &str) {
        self.vector.upsert(session_date, text).await;
    }

    // --- Notifications -------------------------------------------------

    pub async fn add_notification(&self, channel: &str, message: &str, metadata: Option<&str>) -> AppResult<i64> {
        self.relational.add_notification(channel, message, metadata).await
    }

    pub async fn get_notifications(&self, channel: &str) -> AppResult<Vec<Notification>> {
        self.relational.get_notifications(channel).await
    }

    pub async fn mark_notifications_read(&self, ids: &[i64]) -> AppResult<()> {
        self.relational.mark_notifications_read(ids).await
    }

    // --- Chats -----------------------------------------------------------

    pub async fn add_chat(&self, date: &str, role: &str, content: &str, metadata: Option<&str>) -> AppResult<i64> {
        self.relational.add_chat(date, role, content, metadata).await
    }

    pub async fn get_chats(&self, date: &str) -> AppResult<Vec<ChatMessage>> {
        self.relational.get_chats(date).await
    }

    // --- Personal notes ------------------------------------------------

    pub async fn add_manual_note(&self, date: &str, content: &str) -> AppResult<i64> {
        self.relational.add_manual_note(date, content).await
    }

    pub async fn get_manual_notes(&self, date: &str) -> AppResult<Vec<ManualNote>> {
        self.relational.get_manual_notes(date).await
    }

    pub async fn delete_manual_note(&self, id: i64) -> AppResult<()> {
        self.relational.delete_manual_note(id).await
    }

    pub async fn replace_manual_notes(&self, date: &str, contents: &[String]) -> AppResult<()> {
        self.relational.replace_manual_notes(date, contents).await
    }

    // --- Archives ----------------------------------------------------

    pub async fn create_archive(&self, name: &str) -> AppResult<Archive> {
        self.relational.create_archive(name).await
    }

    pub async fn list_archives(&self) -> AppResult<Vec<Archive>> {
        self.relational.list_archives().await
    }

    pub async fn move_to_archive(&self, archive_name: &str, session_date: &str) -> AppResult<()> {
        self.relational.move_to_archive(archive_name, session_date).await
    }

    // --- Retention -----------------------------------------------------

    /// Deletes sessions whose `updatedAt` precedes `now - maxAgeDays`,
    /// through the same `delete_session` path as a user-initiated delete.
    pub async fn apply_retention(&self, policy: RetentionPolicy) -> AppResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(policy.max_age_days);
        let (sessions, _) = self.relational.list_sessions(1, u32::MAX).await?;

        let mut deleted = 0;
        for session in sessions {
            if session.updated_at < cutoff {
                self.delete_session(&session.date).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    // --- Backup / restore ----------------------------------------------

    /// Copies the SQLite file and blob tree to `dest_dir`, emitting a
    /// manifest with a per-file SHA-256 and row counts.
    pub async fn backup(&self, dest_dir: &std::path::Path) -> AppResult<String> {
        fs::create_dir_all(dest_dir).await?;

        let db_path = self.data_dir.join("waddle.db");
        let db_dest = dest_dir.join("waddle.db");
        fs::copy(&db_path, &db_dest).await?;

        let files_src = self.files.root();
        let files_dest = dest_dir.join("files");
        copy_dir_recursive(files_src, &files_dest).await?;

        let mut manifest_entries = Vec::new();
        let db_hash = sha256_file(&db_dest).await?;
        manifest_entries.push(serde_json::json!({ "path": "waddle.db", "sha256": db_hash }));

        for relative in list_dir_recursive(&files_dest).await? {
            let hash = sha256_file(&files_dest.join(&relative)).await?;
            let label = format!("files/{relative}");
            manifest_entries.push(serde_json::json!({ "path": label, "sha256": hash }));
        }

        let (sessions, total) = self.relational.list_sessions(1, 1).await?;
        let _ = sessions;

        let manifest = serde_json::json!({
            "createdAt": Utc::now().to_rfc3339(),
            "sessionCount": total,
            "files": manifest_entries,
        });
        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        fs::write(dest_dir.join("manifest.json"), &manifest_json).await?;

        let manifest_hash = {
            let mut hasher = Sha256::new();
            hasher.update(&manifest_json);
            format!("{:x}", hasher.finalize())
        };
        Ok(manifest_hash)
    }

    /// Verifies the manifest's recorded hashes before overwriting anything;
    /// aborts with `Integrity` on any mismatch.
    pub async fn restore(&self, src_dir: &std::path::Path) -> AppResult<()> {
        let manifest_bytes = fs::read(src_dir.join("manifest.json")).await?;
        let manifest: serde_json::Value = serde_json::from_slice(&manifest_bytes)?;

        let entries = manifest
            .get("files")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for entry in &entries {
            let label = entry.get("path").and_then(|v| v.as_str()).unwrap_or_default();
            let expected_hash = entry.get("sha256").and_then(|v| v.as_str()).unwrap_or_default();
            let actual_hash = sha256_file(&src_dir.join(label)).await?;
            if actual_hash != expected_hash {
                return Err(AppError::integrity(format!("manifest hash mismatch for {label}")));
            }
        }

        fs::copy(src_dir.join("waddle.db"), self.data_dir.join("waddle.db")).await?;
        let files_src = src_dir.join("files");
        if fs::try_exists(&files_src).await.unwrap_or(false) {
            copy_dir_recursive(&files_src, self.files.root()).await?;
        }
        Ok(())
    }

    // --- Health ----------------------------------------------------------

    pub async fn health_check(&self) -> HealthStatus {
        let sql = match self.relational.list_session_dates().await {
            Ok(_) => "ok",
            Err(_) => "down",
        };
        let vector = if self.vector.is_semantic_unavailable() {
            "unavailable"
        } else {
            "ok"
        };
        let embedder = if self.vector.is_semantic_unavailable() { "down" } else { "ok" };

        let disk = disk_health(&self.data_dir).await;

        HealthStatus {
            sql,
            vector,
            embedder,
            disk,
            migration: "idle".to_string(),
        }
    }
}

async fn disk_health(path: &std::path::Path) -> DiskHealth {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let mount = disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len());

        match mount {
            Some(disk) => DiskHealth {
                free_bytes: disk.available_space(),
                total_bytes: disk.total_space(),
            },
            None => DiskHealth {
                free_bytes: 0,
                total_bytes: 0,
            },
        }
    })
    .await
    .unwrap_or(DiskHealth {
        free_bytes: 0,
        total_bytes: 0,
    })
}

async fn sha256_file(path: &std::path::Path) -> AppResult<String> {
    let bytes = fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Lists every file under `root`, relative to it, for manifest construction.
async fn list_dir_recursive(root: &std::path::Path) -> AppResult<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(out)
}

async fn copy_dir_recursive(src: &std::path::Path, dest: &std::path::Path) -> AppResult<()> {
    fs::create_dir_all(dest).await?;
    let mut stack = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        let mut entries = match fs::read_dir(&from).await {
            Ok(e) => e,
            Err(_) => continue,
        };
        while let Some(entry) = entries.next_entry().await? {
            let from_path = entry.path();
            let to_path = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                fs::create_dir_all(&to_path).await?;
                stack.push((from_path, to_path));
            } else {
                fs::copy(&from_path, &to_path).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn test_engine() -> (StorageEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            port: 8080,
            data_dir: dir.path().to_path_buf(),
            legacy_dir: dir.path().join("legacy"),
            ai_base_url: "http://127.0.0.1:1".to_string(),
            ai_timeout_secs: 1,
            focus_poll_hz: 2,
            focus_debounce_ms: 1000,
            screenshot_interval_secs: 5,
            block_cap_secs: 7200,
            ocr_workers: 2,
            ocr_queue_depth: 8,
            embed_max_attempts: 1,
            embed_queue_depth: 8,
            log_level: "info".to_string(),
        };
        let ai = Arc::new(AiClient::new(config.ai_base_url.clone(), Duration::from_secs(1)).unwrap());
        let engine = StorageEngine::open(&config, ai).await.unwrap();
        (engine, dir)
    }

    #[tokio::test]
    async fn create_and_delete_session_unlinks_blobs() {
        let (engine, _dir) = test_engine().await;
        engine.create_session("2024-03-14").await.unwrap();

        let png = {
            let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
            bytes.extend_from_slice(&[0u8; 16]);
            bytes
        };
        let captured_at = "2024-03-14T10:00:00Z".parse().unwrap();
        let file_ref = engine.save_screenshot("2024-03-14", "Chrome", captured_at, &png).await.unwrap();
        assert!(engine.files.read(&file_ref.path).await.is_ok());

        engine.delete_session("2024-03-14").await.unwrap();
        assert!(engine.files.read(&file_ref.path).await.is_err());
    }

    #[tokio::test]
    async fn semantic_search_degrades_gracefully_when_embedder_down() {
        let (engine, _dir) = test_engine().await;
        let results = engine.semantic_search("anything", 5, None, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn health_check_reports_sql_ok() {
        let (engine, _dir) = test_engine().await;
        let health = engine.health_check().await;
        assert_eq!(health.sql, "ok");
    }

    #[tokio::test]
    async fn backup_manifest_hashes_every_blob() {
        let (engine, _dir) = test_engine().await;
        engine.create_session("2024-03-14").await.unwrap();

        let png = {
            let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
            bytes.extend_from_slice(&[0u8; 16]);
            bytes
        };
        let captured_at = "2024-03-14T10:00:00Z".parse().unwrap();
        let file_ref = engine.save_screenshot("2024-03-14", "Chrome", captured_at, &png).await.unwrap();

        let backup_dir = tempfile::tempdir().unwrap();
        engine.backup(backup_dir.path()).await.unwrap();

        let manifest: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(backup_dir.path().join("manifest.json")).await.unwrap()).unwrap();
        let files = manifest.get("files").and_then(|v| v.as_array()).unwrap();

        let blob_label = format!("files/{}", file_ref.path);
        assert!(
            files.iter().any(|entry| entry.get("path").and_then(|v| v.as_str()) == Some(blob_label.as_str())),
            "manifest should contain an entry for the screenshot blob: {files:?}"
        );
    }

    #[tokio::test]
    async fn backup_then_restore_round_trips() {
        let (engine, _dir) = test_engine().await;
        engine.create_session("2024-03-14").await.unwrap();
        let png = {
            let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
            bytes.extend_from_slice(&[0u8; 16]);
            bytes
        };
        let captured_at = "2024-03-14T10:00:00Z".parse().unwrap();
        let file_ref = engine.save_screenshot("2024-03-14", "Chrome", captured_at, &png).await.unwrap();

        let backup_dir = tempfile::tempdir().unwrap();
        engine.backup(backup_dir.path()).await.unwrap();
        engine.restore(backup_dir.path()).await.unwrap();

        assert!(engine.files.read(&file_ref.path).await.is_ok());
    }
}

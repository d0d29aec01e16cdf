// src/state.rs
// Application state shared across HTTP handlers and the capture pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::ai::AiClient;
use crate::capture::sources::{
    NullClipboardSource, UnavailableAccessibilitySource,
};
use crate::capture::{Blacklist, CapturePipeline, PipelineConfig};
use crate::config::Config;
use crate::error::AppResult;
use crate::storage::migration::MigrationManager;
use crate::storage::StorageEngine;

/// Application state shared across handlers. Cloning is cheap: every field
/// is itself an `Arc` or a `Clone`-cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<StorageEngine>,
    pub ai: Arc<AiClient>,
    pub blacklist: Blacklist,
    pub paused: Arc<AtomicBool>,
    pub api_secret: String,
    pub migration: Arc<RwLock<MigrationManager>>,
    pipeline: Arc<RwLock<Option<Arc<CapturePipeline>>>>,
}

impl AppState {
    pub async fn new(config: &Config, api_secret: String) -> AppResult<Self> {
        let ai = Arc::new(AiClient::new(
            config.ai_base_url.clone(),
            std::time::Duration::from_secs(config.ai_timeout_secs),
        )?);

        let engine = Arc::new(StorageEngine::open(config, ai.clone()).await?);
        let blacklist = Blacklist::load(config.blacklist_path()).await;

        let migration = Arc::new(RwLock::new(MigrationManager::new(
            config.legacy_dir.clone(),
            config.data_dir.clone(),
            config.migration_state_path(),
        )));

        info!("application state initialized");

        Ok(Self {
            engine,
            ai,
            blacklist,
            paused: Arc::new(AtomicBool::new(false)),
            api_secret,
            migration,
            pipeline: Arc::new(RwLock::new(None)),
        })
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
        if let Ok(guard) = self.pipeline.try_read() {
            if let Some(pipeline) = guard.as_ref() {
                pipeline.set_paused(paused);
            }
        }
    }

    /// Spawns the capture pipeline using the real OS-specific sources; those
    /// collaborators live outside this crate's scope (spec §4.7), so the
    /// focus/screenshot/OCR sources here are the null/unavailable fixtures
    /// until a platform integration is wired in by the embedding binary.
    pub async fn spawn_capture_pipeline(&self, config: &Config) {
        let pipeline = CapturePipeline::spawn(
            self.engine.clone(),
            self.blacklist.clone(),
            Arc::new(crate::capture::sources::ScriptedFocusSource::new(Vec::new())),
            Arc::new(NullClipboardSource),
            Arc::new(crate::capture::sources::FixedScreenshotSource { bytes: Vec::new() }),
            Arc::new(crate::capture::sources::FixedOcrSource { text: String::new() }),
            Arc::new(UnavailableAccessibilitySource),
            PipelineConfig {
                focus_poll_hz: config.focus_poll_hz,
                focus_debounce_ms: config.focus_debounce_ms,
                screenshot_interval_secs: config.screenshot_interval_secs,
                block_cap_secs: config.block_cap_secs as i64,
                ocr_workers: config.ocr_workers,
                ocr_queue_depth: config.ocr_queue_depth,
            },
        );
        pipeline.set_paused(self.is_paused());
        *self.pipeline.write().await = Some(pipeline);
    }

    pub async fn stop_capture_pipeline(&self) {
        if let Some(pipeline) = self.pipeline.write().await.take() {
            pipeline.stop().await;
        }
    }
}

// src/capture/pipeline.rs
// C7: Capture Pipeline control loop — focus poll → debounce → screenshot →
// OCR → block assembly, driven by a tokio::select! event loop (modeled on
// the teacher's file-watcher service).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::capture::blacklist::Blacklist;
use crate::capture::ocr_pool::OcrPool;
use crate::capture::sources::{
    AccessibilitySource, ClipboardSource, FocusEvent, FocusSource, OcrSource, ScreenshotSource,
};
use crate::storage::engine::StorageEngine;
use crate::storage::types::CaptureSource;

const BLOCK_CAP_SECS_DEFAULT: i64 = 7200;

struct OpenBlock {
    id: String,
    session_date: String,
    app_name: String,
    opened_at: DateTime<Utc>,
    capture_source: Option<CaptureSource>,
}

/// Folds a newly observed extraction source into the block's running
/// classification: `Hybrid` once both accessibility and OCR have
/// contributed text to the same block (spec.md:139).
fn merge_capture_source(existing: Option<CaptureSource>, observed: CaptureSource) -> CaptureSource {
    match existing {
        None => observed,
        Some(prev) if prev == observed => prev,
        Some(_) => CaptureSource::Hybrid,
    }
}

/// Handle to a running pipeline: carries the paused flag and a shutdown
/// channel, matching the teacher's `shutdown_tx: Option<mpsc::Sender<()>>`.
pub struct CapturePipeline {
    paused: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

pub struct PipelineConfig {
    pub focus_poll_hz: u64,
    pub focus_debounce_ms: u64,
    pub screenshot_interval_secs: u64,
    pub block_cap_secs: i64,
    pub ocr_workers: usize,
    pub ocr_queue_depth: usize,
}

impl CapturePipeline {
    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Spawns the control loop and returns a handle. Sources are trait
    /// objects so platform-specific implementations can be swapped in
    /// without touching this module.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        engine: Arc<StorageEngine>,
        blacklist: Blacklist,
        focus_source: Arc<dyn FocusSource>,
        clipboard_source: Arc<dyn ClipboardSource>,
        screenshot_source: Arc<dyn ScreenshotSource>,
        ocr_source: Arc<dyn OcrSource>,
        accessibility_source: Arc<dyn AccessibilitySource>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        let paused = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let handle = Arc::new(Self {
            paused: paused.clone(),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        });

        tokio::spawn(run_loop(
            engine,
            blacklist,
            focus_source,
            clipboard_source,
            screenshot_source,
            ocr_source,
            accessibility_source,
            config,
            paused,
            shutdown_rx,
        ));

        handle
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
            info!("sent shutdown signal to capture pipeline");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    engine: Arc<StorageEngine>,
    blacklist: Blacklist,
    focus_source: Arc<dyn FocusSource>,
    clipboard_source: Arc<dyn ClipboardSource>,
    screenshot_source: Arc<dyn ScreenshotSource>,
    ocr_source: Arc<dyn OcrSource>,
    accessibility_source: Arc<dyn AccessibilitySource>,
    config: PipelineConfig,
    paused: Arc<AtomicBool>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    info!("capture pipeline started (poll {}Hz, debounce {}ms)", config.focus_poll_hz, config.focus_debounce_ms);

    let (ocr_pool, mut ocr_rx) = OcrPool::spawn(ocr_source, config.ocr_workers, config.ocr_queue_depth);

    let poll_interval = Duration::from_millis((1000 / config.focus_poll_hz.max(1)).max(1));
    let mut focus_timer = tokio::time::interval(poll_interval);
    let mut screenshot_timer = tokio::time::interval(Duration::from_secs(config.screenshot_interval_secs.max(1)));

    let mut pending_target: Option<FocusEvent> = None;
    let mut pending_since: Option<tokio::time::Instant> = None;
    let mut committed_target: Option<FocusEvent> = None;
    let mut open_block: Option<OpenBlock> = None;
    let mut target_blacklisted = false;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("capture pipeline received shutdown signal");
                break;
            }

            Some(completion) = ocr_rx.recv() => {
                if let Err(e) = engine.append_block_ocr_text(&completion.block_id, &completion.text).await {
                    warn!("failed to append OCR text: {e}");
                }
                match &mut open_block {
                    Some(block) if block.id == completion.block_id => {
                        block.capture_source = Some(merge_capture_source(block.capture_source, CaptureSource::Ocr));
                    }
                    _ => {
                        if let Err(e) = engine.merge_block_capture_source(&completion.block_id, CaptureSource::Ocr).await {
                            warn!("failed to record OCR capture source for sealed block {}: {e}", completion.block_id);
                        }
                    }
                }
            }

            _ = focus_timer.tick() => {
                if paused.load(Ordering::Relaxed) {
                    continue;
                }
                match focus_source.poll().await {
                    Ok(Some(event)) => {
                        let is_new = committed_target.as_ref().map(|c| c.process_name != event.process_name || c.window_handle != event.window_handle).unwrap_or(true);
                        if !is_new {
                            pending_target = None;
                            pending_since = None;
                            continue;
                        }

                        let same_pending = pending_target.as_ref().map(|p| p.process_name == event.process_name && p.window_handle == event.window_handle).unwrap_or(false);
                        if !same_pending {
                            pending_target = Some(event);
                            pending_since = Some(tokio::time::Instant::now());
                            continue;
                        }

                        let stable_for = pending_since.map(|since| since.elapsed()).unwrap_or_default();
                        if stable_for >= Duration::from_millis(config.focus_debounce_ms) {
                            let new_target = pending_target.take().unwrap();
                            pending_since = None;

                            if let Some(block) = open_block.take() {
                                seal_block(&engine, &block).await;
                            }

                            target_blacklisted = blacklist.contains(&new_target.process_name).await;
                            if target_blacklisted {
                                debug!("focus target {} is blacklisted, capture inactive", new_target.process_name);
                            }
                            committed_target = Some(new_target);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("focus source poll failed: {e}"),
                }
            }

            _ = screenshot_timer.tick() => {
                if paused.load(Ordering::Relaxed) || target_blacklisted {
                    continue;
                }
                if let Some(target) = &committed_target {
                    let session_date = target.ts.format("%Y-%m-%d").to_string();

                    if let Err(e) = engine.get_or_create_session(&session_date).await {
                        warn!("failed to ensure session {session_date}: {e}");
                        continue;
                    }

                    if open_block.is_none() {
                        match engine.add_activity_block(&session_date, &target.process_name, target.ts, target.ts + chrono::Duration::seconds(1)).await {
                            Ok(id) => {
                                open_block = Some(OpenBlock {
                                    id,
                                    session_date: session_date.clone(),
                                    app_name: target.process_name.clone(),
                                    opened_at: Utc::now(),
                                    capture_source: None,
                                });
                            }
                            Err(e) => {
                                warn!("failed to open activity block: {e}");
                                continue;
                            }
                        }
                    }

                    let block_age = open_block.as_ref().map(|b| (Utc::now() - b.opened_at).num_seconds()).unwrap_or(0);
                    if block_age >= config.block_cap_secs.max(1) {
                        if let Some(block) = open_block.take() {
                            seal_block(&engine, &block).await;
                        }
                        continue;
                    }

                    match screenshot_source.capture(target.window_handle).await {
                        Ok(bytes) => {
                            let captured_at = Utc::now();
                            if let Err(e) = engine.save_screenshot(&session_date, &target.process_name, captured_at, &bytes).await {
                                warn!("screenshot write failed: {e}");
                                continue;
                            }

                            // Structured extraction is cheap and runs inline; only
                            // the OCR fallback is routed through the bounded pool
                            // (spec §4.7: "an OCR job is queued to a bounded
                            // worker pool").
                            match accessibility_source.extract_structured(target.window_handle).await {
                                Ok(Some(extract)) if !extract.text.trim().is_empty() => {
                                    if let Some(block) = &mut open_block {
                                        if let Err(e) = engine.append_block_ocr_text(&block.id, &extract.text).await {
                                            warn!("failed to append structured text: {e}");
                                        }
                                        block.capture_source =
                                            Some(merge_capture_source(block.capture_source, CaptureSource::Accessibility));
                                    }
                                }
                                _ => {
                                    if let Some(block) = &open_block {
                                        ocr_pool.submit(block.id.clone(), bytes);
                                    }
                                }
                            }
                        }
                        Err(e) => warn!("screenshot capture failed: {e}"),
                    }
                }
            }

            clipboard = clipboard_source.poll() => {
                match clipboard {
                    Ok(Some(_event)) if committed_target.is_some() && !target_blacklisted => {
                        debug!("clipboard event attributed to committed target");
                    }
                    Ok(_) => {}
                    Err(e) => warn!("clipboard source poll failed: {e}"),
                }
            }
        }
    }

    if let Some(block) = open_block.take() {
        seal_block(&engine, &block).await;
    }
    info!("capture pipeline stopped");
}

async fn seal_block(engine: &StorageEngine, block: &OpenBlock) {
    let capture_source = block.capture_source;
    let blocks = match engine.get_activity_blocks(&block.session_date, &block.app_name).await {
        Ok(b) => b,
        Err(e) => {
            warn!("failed to load block {} for sealing: {e}", block.id);
            return;
        }
    };
    let ocr_text = blocks.iter().find(|b| b.id == block.id).map(|b| b.ocr_text.clone()).unwrap_or_default();

    // Summarization is best-effort: an unavailable or failing AI backend
    // must never block sealing the activity block (spec §4.7).
    let micro_summary = if ocr_text.trim().is_empty() {
        String::new()
    } else {
        let prompt = format!(
            "Summarize this captured window activity for {} in one short sentence:\n{}",
            block.app_name, ocr_text
        );
        match engine.ai().complete(&prompt).await {
            Ok(Some(summary)) => summary,
            Ok(None) => String::new(),
            Err(e) => {
                warn!("summarization failed for block {}: {e}", block.id);
                String::new()
            }
        }
    };

    if let Err(e) = engine.seal_activity_block(&block.id, &micro_summary, "", capture_source).await {
        warn!("failed to seal block {}: {e}", block.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_cap_default_is_two_hours() {
        assert_eq!(BLOCK_CAP_SECS_DEFAULT, 7200);
    }

    #[test]
    fn capture_source_merges_to_hybrid_on_mismatch() {
        assert_eq!(merge_capture_source(None, CaptureSource::Ocr), CaptureSource::Ocr);
        assert_eq!(
            merge_capture_source(Some(CaptureSource::Ocr), CaptureSource::Ocr),
            CaptureSource::Ocr
        );
        assert_eq!(
            merge_capture_source(Some(CaptureSource::Accessibility), CaptureSource::Ocr),
            CaptureSource::Hybrid
        );
    }
}

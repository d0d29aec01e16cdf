// src/capture/ocr_pool.rs
// Bounded OCR worker pool (spec §4.7/§5): screenshots that have no usable
// structured (accessibility) text are queued here so a slow OCR binary
// invocation never blocks the capture pipeline's focus/screenshot ticker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::capture::sources::OcrSource;

const OCR_TIMEOUT_SECS: u64 = 30;

pub struct OcrJob {
    pub block_id: String,
    pub screenshot_bytes: Vec<u8>,
    requeued: bool,
}

pub struct OcrCompletion {
    pub block_id: String,
    pub text: String,
}

/// Handle to the running pool. Cloning is cheap; all clones share the same
/// bounded queue and worker set.
#[derive(Clone)]
pub struct OcrPool {
    job_tx: mpsc::Sender<OcrJob>,
    dropped_jobs: Arc<AtomicU64>,
}

impl OcrPool {
    /// Spawns `workers` consumers sharing one bounded queue of depth
    /// `queue_depth`. Returns the submission handle and the channel that
    /// completed jobs are reported on.
    pub fn spawn(ocr_source: Arc<dyn OcrSource>, workers: usize, queue_depth: usize) -> (Self, mpsc::Receiver<OcrCompletion>) {
        let (job_tx, job_rx) = mpsc::channel(queue_depth.max(1));
        let (completion_tx, completion_rx) = mpsc::channel(queue_depth.max(1) * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let dropped_jobs = Arc::new(AtomicU64::new(0));

        for worker_id in 0..workers.max(1) {
            tokio::spawn(Self::run_worker(
                worker_id,
                job_rx.clone(),
                job_tx.clone(),
                completion_tx.clone(),
                ocr_source.clone(),
                dropped_jobs.clone(),
            ));
        }

        (Self { job_tx, dropped_jobs }, completion_rx)
    }

    /// Non-blocking submit: a full queue drops the job rather than stalling
    /// the pipeline's control loop, matching the screenshot-tick failure
    /// semantics (spec §4.7: "screenshot errors log and skip").
    pub fn submit(&self, block_id: String, screenshot_bytes: Vec<u8>) {
        let job = OcrJob {
            block_id,
            screenshot_bytes,
            requeued: false,
        };
        if self.job_tx.try_send(job).is_err() {
            self.dropped_jobs.fetch_add(1, Ordering::Relaxed);
            warn!("OCR queue full, dropping job");
        }
    }

    pub fn dropped_jobs(&self) -> u64 {
        self.dropped_jobs.load(Ordering::Relaxed)
    }

    async fn run_worker(
        worker_id: usize,
        job_rx: Arc<Mutex<mpsc::Receiver<OcrJob>>>,
        job_tx: mpsc::Sender<OcrJob>,
        completion_tx: mpsc::Sender<OcrCompletion>,
        ocr_source: Arc<dyn OcrSource>,
        dropped_jobs: Arc<AtomicU64>,
    ) {
        loop {
            let job = {
                let mut rx = job_rx.lock().await;
                match rx.recv().await {
                    Some(job) => job,
                    None => break,
                }
            };

            let result = tokio::time::timeout(
                Duration::from_secs(OCR_TIMEOUT_SECS),
                ocr_source.extract(&job.screenshot_bytes),
            )
            .await;

            match result {
                Ok(Ok(text)) => {
                    let completion = OcrCompletion {
                        block_id: job.block_id,
                        text,
                    };
                    if completion_tx.send(completion).await.is_err() {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    warn!("OCR worker {worker_id} extraction failed: {e}");
                }
                Err(_) if !job.requeued => {
                    warn!("OCR worker {worker_id} timed out after {OCR_TIMEOUT_SECS}s, requeuing once");
                    let retry = OcrJob {
                        block_id: job.block_id,
                        screenshot_bytes: job.screenshot_bytes,
                        requeued: true,
                    };
                    if job_tx.try_send(retry).is_err() {
                        dropped_jobs.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(_) => {
                    warn!("OCR worker {worker_id} timed out again, dropping job");
                    dropped_jobs.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sources::FixedOcrSource;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn submitted_job_reports_completion() {
        let source = Arc::new(FixedOcrSource { text: "hello".to_string() });
        let (pool, mut completions) = OcrPool::spawn(source, 1, 4);

        pool.submit("block-1".to_string(), vec![1, 2, 3]);

        let completion = completions.recv().await.unwrap();
        assert_eq!(completion.block_id, "block-1");
        assert_eq!(completion.text, "hello");
    }

    use crate::error::AppResult;

    struct BlockingOcrSource {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl OcrSource for BlockingOcrSource {
        async fn extract(&self, _bytes: &[u8]) -> AppResult<String> {
            self.release.notified().await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn full_queue_drops_excess_jobs() {
        let release = Arc::new(Notify::new());
        let source = Arc::new(BlockingOcrSource { release: release.clone() });
        // One worker, queue depth 1: the worker immediately takes the first
        // job and blocks on `release`, so the channel fills with exactly one
        // more before the third submit overflows it.
        let (pool, _completions) = OcrPool::spawn(source, 1, 1);

        pool.submit("a".to_string(), vec![]);
        tokio::task::yield_now().await;
        pool.submit("b".to_string(), vec![]);
        tokio::task::yield_now().await;
        pool.submit("c".to_string(), vec![]);
        tokio::task::yield_now().await;

        assert_eq!(pool.dropped_jobs(), 1);
        release.notify_waiters();
    }
}

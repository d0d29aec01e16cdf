// src/storage/vector/mod.rs
// C4: Vector Store — in-process embedding index, one vector per session
// date. Upserts are queued and embedded asynchronously by a single
// background consumer; queries embed synchronously and score by cosine
// similarity against the in-memory map.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::ai::AiClient;
use crate::crypto::sha256_hex;
use crate::error::{AppError, AppResult};
use crate::storage::types::VectorRecord;

const QUEUE_DEPTH_DEFAULT: usize = 64;
const EMBED_MODEL: &str = "default";

struct UpsertJob {
    session_date: String,
    text: String,
    attempt: u32,
}

/// Shared, lock-protected index plus a handle to push upsert jobs onto the
/// background queue. Cloning is cheap; all clones see the same index.
#[derive(Clone)]
pub struct VectorStore {
    index: Arc<RwLock<HashMap<String, VectorRecord>>>,
    job_tx: mpsc::Sender<UpsertJob>,
    dropped_jobs: Arc<std::sync::atomic::AtomicU64>,
    unavailable: Arc<std::sync::atomic::AtomicBool>,
}

impl VectorStore {
    /// Spawns the single-consumer embedding worker and returns a handle.
    /// `max_attempts` bounds the exponential-backoff retry loop per job.
    pub fn spawn(ai: Arc<AiClient>, queue_depth: usize, max_attempts: u32) -> Self {
        let (job_tx, job_rx) = mpsc::channel(queue_depth.max(1).min(QUEUE_DEPTH_DEFAULT * 4));
        let index = Arc::new(RwLock::new(HashMap::new()));
        let dropped_jobs = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let unavailable = Arc::new(std::sync::atomic::AtomicBool::new(false));

        tokio::spawn(Self::run_worker(
            job_rx,
            job_tx.clone(),
            index.clone(),
            ai,
            max_attempts,
            dropped_jobs.clone(),
            unavailable.clone(),
        ));

        Self {
            index,
            job_tx,
            dropped_jobs,
            unavailable,
        }
    }

    async fn run_worker(
        mut job_rx: mpsc::Receiver<UpsertJob>,
        job_tx: mpsc::Sender<UpsertJob>,
        index: Arc<RwLock<HashMap<String, VectorRecord>>>,
        ai: Arc<AiClient>,
        max_attempts: u32,
        dropped_jobs: Arc<std::sync::atomic::AtomicU64>,
        unavailable: Arc<std::sync::atomic::AtomicBool>,
    ) {
        while let Some(job) = job_rx.recv().await {
            let text_hash = sha256_hex(job.text.as_bytes());

            {
                let guard = index.read().await;
                if let Some(existing) = guard.get(&job.session_date) {
                    if existing.text_hash == text_hash {
                        debug!("vector upsert for {} is idempotent, skipping", job.session_date);
                        continue;
                    }
                }
            }

            match ai.embed(&job.text).await {
                Ok(Some(vector)) => {
                    unavailable.store(false, std::sync::atomic::Ordering::Relaxed);
                    let record = VectorRecord {
                        session_date: job.session_date.clone(),
                        vector,
                        text_hash,
                        model: EMBED_MODEL.to_string(),
                        generated_at: Utc::now(),
                    };
                    index.write().await.insert(job.session_date, record);
                }
                Ok(None) => {
                    unavailable.store(true, std::sync::atomic::Ordering::Relaxed);
                    Self::retry_or_drop(job, &job_tx, max_attempts, &dropped_jobs).await;
                }
                Err(e) => {
                    warn!("embedding call failed for {}: {e}", job.session_date);
                    Self::retry_or_drop(job, &job_tx, max_attempts, &dropped_jobs).await;
                }
            }
        }
    }

    /// Sleeps with exponential backoff, then re-enqueues the job with its
    /// attempt counter incremented, or drops it once `max_attempts` is hit.
    async fn retry_or_drop(
        mut job: UpsertJob,
        job_tx: &mpsc::Sender<UpsertJob>,
        max_attempts: u32,
        dropped_jobs: &Arc<std::sync::atomic::AtomicU64>,
    ) {
        job.attempt += 1;
        if job.attempt >= max_attempts {
            warn!(
                "dropping embedding job for {} after {} attempts",
                job.session_date, job.attempt
            );
            dropped_jobs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        }
        let delay_ms = 200u64.saturating_mul(1u64 << job.attempt.min(8));
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        if job_tx.try_send(job).is_err() {
            dropped_jobs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Enqueues an embedding job; never blocks the caller. If the queue is
    /// full the job is dropped and the drop counter incremented (bounded
    /// FIFO per spec).
    pub async fn upsert(&self, session_date: &str, text: &str) {
        let job = UpsertJob {
            session_date: session_date.to_string(),
            text: text.to_string(),
            attempt: 0,
        };
        if self.job_tx.try_send(job).is_err() {
            warn!("vector upsert queue full, dropping job for {session_date}");
            self.dropped_jobs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn dropped_job_count(&self) -> u64 {
        self.dropped_jobs.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// `true` once the AI client has reported unavailable at least once
    /// since the last successful embed call.
    pub fn is_semantic_unavailable(&self) -> bool {
        self.unavailable.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Embeds `query_text` synchronously and returns the `top_k` closest
    /// session dates by cosine similarity, optionally restricted to a date
    /// range inclusive on both ends.
    pub async fn query(
        &self,
        ai: &AiClient,
        query_text: &str,
        top_k: usize,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> AppResult<Vec<(String, f32)>> {
        let query_vector = match ai.embed(query_text).await? {
            Some(v) => v,
            None => return Err(AppError::unavailable("embedding service is unavailable")),
        };

        let guard = self.index.read().await;
        let mut scored: Vec<(String, f32)> = guard
            .values()
            .filter(|record| {
                let date = NaiveDate::parse_from_str(&record.session_date, "%Y-%m-%d").ok();
                match (date, date_from, date_to) {
                    (Some(d), Some(from), Some(to)) => d >= from && d <= to,
                    (Some(d), Some(from), None) => d >= from,
                    (Some(d), None, Some(to)) => d <= to,
                    _ => true,
                }
            })
            .map(|record| (record.session_date.clone(), cosine_similarity(&query_vector, &record.vector)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub async fn remove(&self, session_date: &str) {
        self.index.write().await.remove(session_date);
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_length_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}

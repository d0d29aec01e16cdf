// src/storage/relational/search.rs
// Full-text search across sessions_fts and blocks_fts (spec §4.3, §4.5).

use sqlx::Row;

use super::RelationalStore;
use crate::error::{AppError, AppResult};
use crate::storage::types::SearchResult;

const MAX_PAGE_SIZE: u32 = 100;
const SNIPPET_RADIUS: usize = 30;

/// Extracts a window of `±radius` characters around the first occurrence of
/// any whitespace-separated query term (case-insensitive), falling back to
/// the start of the text when no literal term is found (FTS5's porter
/// stemmer can match a form that never appears verbatim).
fn build_snippet(text: &str, query: &str, radius: usize) -> String {
    let lower = text.to_lowercase();
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let hit = terms.iter().find_map(|term| lower.find(term.as_str()));

    let chars: Vec<char> = text.chars().collect();
    let center = match hit {
        Some(byte_idx) => lower[..byte_idx].chars().count(),
        None => 0,
    };

    let start = center.saturating_sub(radius);
    let end = (center + radius).min(chars.len());
    let mut snippet: String = chars[start..end].iter().collect();

    if start > 0 {
        snippet = format!("…{snippet}");
    }
    if end < chars.len() {
        snippet = format!("{snippet}…");
    }
    snippet
}

impl RelationalStore {
    /// Searches both the session-level and block-level full-text indices,
    /// merging results and keeping the best-ranked hit per session date.
    pub async fn full_text_search(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> AppResult<(Vec<SearchResult>, u64)> {
        if query.trim().is_empty() {
            return Err(AppError::validation("search query must not be empty"));
        }
        if page == 0 || page_size == 0 {
            return Err(AppError::validation("page and pageSize must be >= 1"));
        }
        if page_size > MAX_PAGE_SIZE {
            return Err(AppError::validation(format!(
                "pageSize must not exceed {MAX_PAGE_SIZE}"
            )));
        }

        let session_rows = sqlx::query(
            r#"
            SELECT date, title, summary, extracted_text, bm25(sessions_fts) AS rank
            FROM sessions_fts WHERE sessions_fts MATCH ?
            "#,
        )
        .bind(query)
        .fetch_all(self.pool())
        .await?;

        let block_rows = sqlx::query(
            r#"
            SELECT session_date, micro_summary, ocr_text, bm25(blocks_fts) AS rank
            FROM blocks_fts WHERE blocks_fts MATCH ?
            "#,
        )
        .bind(query)
        .fetch_all(self.pool())
        .await?;

        let mut best: std::collections::HashMap<String, (f64, String)> =
            std::collections::HashMap::new();

        for row in &session_rows {
            let date: String = row.try_get("date")?;
            let rank: f64 = row.try_get("rank")?;
            let title: String = row.try_get("title")?;
            let summary: String = row.try_get("summary")?;
            let extracted_text: String = row.try_get("extracted_text")?;
            let combined = format!("{title} {summary} {extracted_text}");

            best.entry(date)
                .and_modify(|(best_rank, snippet)| {
                    if rank < *best_rank {
                        *best_rank = rank;
                        *snippet = combined.clone();
                    }
                })
                .or_insert((rank, combined));
        }

        for row in &block_rows {
            let date: String = row.try_get("session_date")?;
            let rank: f64 = row.try_get("rank")?;
            let micro_summary: String = row.try_get("micro_summary")?;
            let ocr_text: String = row.try_get("ocr_text")?;
            let combined = format!("{micro_summary} {ocr_text}");

            best.entry(date)
                .and_modify(|(best_rank, snippet)| {
                    if rank < *best_rank {
                        *best_rank = rank;
                        *snippet = combined.clone();
                    }
                })
                .or_insert((rank, combined));
        }

        let mut results: Vec<(String, f64, String)> = best
            .into_iter()
            .map(|(date, (rank, text))| (date, rank, text))
            .collect();
        // bm25() is more negative for better matches; sort ascending.
        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let total = results.len() as u64;
        let offset = ((page - 1) as usize) * (page_size as usize);
        let page_results = results
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .map(|(date, rank, text)| SearchResult {
                session_date: date,
                snippet: build_snippet(&text, query, SNIPPET_RADIUS),
                score: (-rank) as f32,
            })
            .collect();

        Ok((page_results, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_session_by_title_or_summary() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        let mut session = store.create_session("2024-03-14").await.unwrap();
        session.title = "Kubernetes migration planning".to_string();
        session.summary = "Discussed moving the fleet to managed nodes.".to_string();
        store.update_session(&session).await.unwrap();

        let (results, total) = store.full_text_search("kubernetes", 1, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(results[0].session_date, "2024-03-14");
        assert!(results[0].snippet.to_lowercase().contains("kubernetes"));
    }

    #[tokio::test]
    async fn finds_session_by_block_text() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        store.create_session("2024-03-14").await.unwrap();
        let id = store
            .add_activity_block(
                "2024-03-14",
                "Chrome",
                chrono::Utc::now(),
                chrono::Utc::now() + chrono::Duration::minutes(1),
            )
            .await
            .unwrap();
        store
            .seal_activity_block(&id, "reading about rustaceans", "rustaceans everywhere", None)
            .await
            .unwrap();

        let (results, _) = store.full_text_search("rustaceans", 1, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].session_date, "2024-03-14");
    }

    #[tokio::test]
    async fn rejects_oversized_page() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        let err = store.full_text_search("anything", 1, 101).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn rejects_empty_query() {
        let store = RelationalStore::open_in_memory().await.unwrap();
        let err = store.full_text_search("   ", 1, 10).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }
}

// src/export.rs
// C9: Markdown export — renders a session to the fixed section order spec'd
// for `files/<date>/<app>/exports/*.md`: H1 title, date/time/duration, tags,
// summary, optional personal notes, then a per-app activity log.

use std::fmt::Write as _;

use chrono::NaiveDate;

use crate::error::AppResult;
use crate::storage::engine::StorageEngine;
use crate::storage::types::ActivityBlock;

/// Renders `date`'s session as Markdown. Returns the document body; callers
/// decide where (or whether) to persist it under `files/<date>/.../exports/`.
pub async fn render_session(engine: &StorageEngine, date: &str) -> AppResult<String> {
    let session = engine.get_session(date).await?;
    let apps = engine.list_apps_for_session(date).await?;
    let notes = engine.get_manual_notes(date).await?;

    let mut blocks_by_app = Vec::with_capacity(apps.len());
    for app in &apps {
        let blocks = engine.get_activity_blocks(date, app).await?;
        blocks_by_app.push((app.clone(), blocks));
    }

    let title = if session.title.is_empty() {
        session.custom_title.clone().unwrap_or_else(|| date.to_string())
    } else {
        session.title.clone()
    };

    let mut out = String::new();
    let _ = writeln!(out, "# {title}");
    out.push('\n');

    let _ = writeln!(out, "**Date:** {}", format_date(date));
    let (start, end) = session_span(&blocks_by_app);
    match (start, end) {
        (Some(start), Some(end)) => {
            let _ = writeln!(out, "**Time:** {} – {}", start.format("%H:%M:%S"), end.format("%H:%M:%S"));
            let duration = end - start;
            let _ = writeln!(
                out,
                "**Duration:** {}h {}m",
                duration.num_hours(),
                duration.num_minutes() % 60
            );
        }
        _ => {
            out.push_str("**Time:** —\n");
            out.push_str("**Duration:** 0h 0m\n");
        }
    }
    out.push('\n');

    if session.tags.is_empty() {
        out.push_str("Tags: _none_\n\n");
    } else {
        let _ = writeln!(out, "Tags: {}\n", session.tags.join(", "));
    }

    out.push_str("## Summary\n\n");
    let summary = session
        .custom_summary
        .filter(|s| !s.is_empty())
        .unwrap_or(session.summary);
    if summary.is_empty() {
        out.push_str("_No summary available._\n\n");
    } else {
        let _ = writeln!(out, "{summary}\n");
    }

    if !notes.is_empty() {
        out.push_str("## Personal Notes\n\n");
        for note in &notes {
            let _ = writeln!(out, "- {}", note.content);
        }
        out.push('\n');
    }

    out.push_str("## Activity Log\n\n");
    for (app, blocks) in &blocks_by_app {
        let _ = writeln!(out, "### {app}\n");
        for block in blocks {
            let summary = if block.micro_summary.is_empty() {
                "(no summary)"
            } else {
                block.micro_summary.as_str()
            };
            let _ = writeln!(
                out,
                "- {}–{}: {}",
                block.start_time.format("%H:%M:%S"),
                block.end_time.format("%H:%M:%S"),
                summary
            );
        }
        out.push('\n');
    }

    Ok(out)
}

fn session_span(blocks_by_app: &[(String, Vec<ActivityBlock>)]) -> (Option<chrono::DateTime<chrono::Utc>>, Option<chrono::DateTime<chrono::Utc>>) {
    let mut start = None;
    let mut end = None;
    for (_, blocks) in blocks_by_app {
        for block in blocks {
            start = Some(start.map_or(block.start_time, |s: chrono::DateTime<chrono::Utc>| s.min(block.start_time)));
            end = Some(end.map_or(block.end_time, |e: chrono::DateTime<chrono::Utc>| e.max(block.end_time)));
        }
    }
    (start, end)
}

fn format_date(date: &str) -> String {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|d| d.format("%A, %B %-d, %Y").to_string())
        .unwrap_or_else(|_| date.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiClient;
    use crate::config::Config;
    use std::sync::Arc;
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
    async fn renders_fixed_section_order() {
        let (engine, _dir) = test_engine().await;
        engine.create_session("2024-03-14").await.unwrap();
        let mut session = engine.get_session("2024-03-14").await.unwrap();
        session.title = "Pi Day".to_string();
        session.summary = "Worked on release notes.".to_string();
        session.tags = vec!["release".to_string(), "writing".to_string()];
        engine.update_session(&session).await.unwrap();
        engine.add_manual_note("2024-03-14", "remember to ship").await.unwrap();

        let doc = render_session(&engine, "2024-03-14").await.unwrap();
        let summary_pos = doc.find("## Summary").unwrap();
        let notes_pos = doc.find("## Personal Notes").unwrap();
        let log_pos = doc.find("## Activity Log").unwrap();

        assert!(doc.starts_with("# Pi Day"));
        assert!(summary_pos < notes_pos);
        assert!(notes_pos < log_pos);
        assert!(doc.contains("remember to ship"));
        assert!(doc.contains("Tags: release, writing"));
    }

    #[tokio::test]
    async fn omits_personal_notes_section_when_empty() {
        let (engine, _dir) = test_engine().await;
        engine.create_session("2024-03-14").await.unwrap();
        let doc = render_session(&engine, "2024-03-14").await.unwrap();
        assert!(!doc.contains("## Personal Notes"));
    }
}

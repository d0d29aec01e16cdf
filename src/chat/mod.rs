// src/chat/mod.rs
// C10: Chat Context Assembler — pure functions building a prompt prefix from
// the session catalog. No I/O; callers fetch sessions/blocks beforehand.

use crate::storage::types::{ActivityBlock, Session};

const GLOBAL_RECENT_DAYS: i64 = 3;
const GLOBAL_MATCH_CAP: usize = 3;
const GLOBAL_TOTAL_CAP: usize = 5;
const OCR_EXCERPT_CHARS: usize = 500;

/// Builds the prompt prefix for global-scope chat: the most recent sessions
/// plus up to 3 more whose title/summary/tags contain a query token, capped
/// at 5 sessions total.
pub fn assemble_global_context(question: &str, mut catalog: Vec<Session>) -> String {
    catalog.sort_by(|a, b| b.date.cmp(&a.date));

    let mut selected: Vec<Session> = catalog.iter().take(GLOBAL_RECENT_DAYS as usize).cloned().collect();
    let selected_dates: std::collections::HashSet<String> =
        selected.iter().map(|s| s.date.clone()).collect();

    let tokens: Vec<String> = question
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= 3)
        .collect();

    if !tokens.is_empty() {
        let mut matched = 0;
        for session in &catalog {
            if selected.len() >= GLOBAL_TOTAL_CAP || matched >= GLOBAL_MATCH_CAP {
                break;
            }
            if selected_dates.contains(&session.date) {
                continue;
            }
            let haystack = format!(
                "{} {} {}",
                session.title.to_lowercase(),
                session.summary.to_lowercase(),
                session.tags.join(" ").to_lowercase()
            );
            if tokens.iter().any(|t| haystack.contains(t.as_str())) {
                selected.push(session.clone());
                matched += 1;
            }
        }
    }

    selected.truncate(GLOBAL_TOTAL_CAP);

    let mut out = String::new();
    for session in &selected {
        out.push_str(&format!(
            "## {} — {}\n{}\n\n",
            session.date,
            if session.title.is_empty() { "(untitled)" } else { &session.title },
            session.custom_summary.as_deref().unwrap_or(&session.summary)
        ));
    }
    out
}

/// Serializes every block's `(startTime, microSummary)` plus a bounded OCR
/// excerpt, in order, with an optionally-focused block prepended.
pub fn assemble_session_context(blocks: &[ActivityBlock], focused_block_id: Option<&str>) -> String {
    let mut out = String::new();

    if let Some(focused_id) = focused_block_id {
        if let Some(block) = blocks.iter().find(|b| b.id == focused_id) {
            out.push_str("### Focused block\n");
            out.push_str(&render_block(block));
            out.push('\n');
        }
    }

    out.push_str("### Timeline\n");
    for block in blocks {
        out.push_str(&render_block(block));
    }
    out
}

fn render_block(block: &ActivityBlock) -> String {
    let excerpt: String = block.ocr_text.chars().take(OCR_EXCERPT_CHARS).collect();
    format!(
        "- [{}] {} ({}): {}\n",
        block.start_time.format("%H:%M:%S"),
        block.app_name,
        if block.micro_summary.is_empty() { "(pending)" } else { &block.micro_summary },
        excerpt
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn session(date: &str, title: &str, summary: &str) -> Session {
        Session {
            date: date.to_string(),
            title: title.to_string(),
            summary: summary.to_string(),
            custom_title: None,
            custom_summary: None,
            original_summary: String::new(),
            extracted_text: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn global_context_caps_at_five_and_prefers_recent() {
        let catalog = vec![
            session("2024-03-14", "pi day", "math stuff"),
            session("2024-03-13", "", "ordinary day"),
            session("2024-03-12", "", "ordinary day"),
            session("2024-01-01", "kubernetes migration", "moved clusters"),
        ];
        let context = assemble_global_context("tell me about kubernetes", catalog);
        assert!(context.contains("2024-03-14"));
        assert!(context.contains("2024-03-13"));
        assert!(context.contains("2024-03-12"));
        assert!(context.contains("kubernetes migration"));
    }

    #[test]
    fn session_context_prepends_focused_block() {
        let blocks = vec![
            ActivityBlock {
                id: "a".to_string(),
                session_date: "2024-03-14".to_string(),
                app_name: "Chrome".to_string(),
                start_time: Utc.with_ymd_and_hms(2024, 3, 14, 10, 0, 0).unwrap(),
                end_time: Utc.with_ymd_and_hms(2024, 3, 14, 10, 5, 0).unwrap(),
                micro_summary: "reading docs".to_string(),
                ocr_text: "some text".to_string(),
                screenshot_refs: Vec::new(),
                is_pending: false,
                capture_source: None,
            },
            ActivityBlock {
                id: "b".to_string(),
                session_date: "2024-03-14".to_string(),
                app_name: "Slack".to_string(),
                start_time: Utc.with_ymd_and_hms(2024, 3, 14, 10, 5, 0).unwrap(),
                end_time: Utc.with_ymd_and_hms(2024, 3, 14, 10, 10, 0).unwrap(),
                micro_summary: "chatting".to_string(),
                ocr_text: "".to_string(),
                screenshot_refs: Vec::new(),
                is_pending: false,
                capture_source: None,
            },
        ];

        let context = assemble_session_context(&blocks, Some("b"));
        let focused_idx = context.find("Focused block").unwrap();
        let timeline_idx = context.find("Timeline").unwrap();
        assert!(focused_idx < timeline_idx);
        assert!(context.contains("chatting"));
    }
}

// src/capture/blacklist.rs
// Process-name blacklist: an in-memory set guarded by a read-write lock with
// copy-on-write replacement (spec §5, §9 "global mutable state").

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::AppResult;

#[derive(Clone)]
pub struct Blacklist {
    path: PathBuf,
    entries: Arc<RwLock<Arc<HashSet<String>>>>,
}

impl Blacklist {
    /// Loads `blacklist.txt` if present; on read error, falls back to an
    /// empty in-memory set rather than failing startup (spec §4.7: "blacklist
    /// file errors fall back to the last good in-memory copy").
    pub async fn load(path: PathBuf) -> Self {
        let entries = match fs::read_to_string(&path).await {
            Ok(contents) => parse(&contents),
            Err(_) => HashSet::new(),
        };
        Self {
            path,
            entries: Arc::new(RwLock::new(Arc::new(entries))),
        }
    }

    pub async fn contains(&self, process_name: &str) -> bool {
        self.entries.read().await.contains(&process_name.to_lowercase())
    }

    pub async fn snapshot(&self) -> Vec<String> {
        let mut out: Vec<String> = self.entries.read().await.iter().cloned().collect();
        out.sort();
        out
    }

    /// Replaces the entire set and persists it to disk, preserving any
    /// comment lines already in the file is explicitly NOT attempted here —
    /// POST replaces wholesale per spec §6.
    pub async fn replace(&self, names: Vec<String>) -> AppResult<()> {
        let normalized: HashSet<String> = names
            .into_iter()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();

        let serialized = {
            let mut sorted: Vec<&String> = normalized.iter().collect();
            sorted.sort();
            sorted.into_iter().cloned().collect::<Vec<_>>().join("\n")
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(e) = fs::write(&self.path, serialized).await {
            warn!("failed to persist blacklist, keeping previous in-memory copy: {e}");
            return Err(e.into());
        }

        *self.entries.write().await = Arc::new(normalized);
        Ok(())
    }
}

/// Parses newline-separated, case-insensitive process names, ignoring
/// `#`-prefixed comments and blank lines.
fn parse(contents: &str) -> HashSet<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_ignores_comments_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.txt");
        fs::write(&path, "# comment\nChrome.exe\n\nslack.exe\n").await.unwrap();

        let blacklist = Blacklist::load(path).await;
        assert!(blacklist.contains("chrome.exe").await);
        assert!(blacklist.contains("SLACK.EXE").await);
        assert!(!blacklist.contains("notepad.exe").await);
    }

    #[tokio::test]
    async fn load_missing_file_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let blacklist = Blacklist::load(dir.path().join("nope.txt")).await;
        assert!(blacklist.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn replace_persists_and_updates_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.txt");
        let blacklist = Blacklist::load(path.clone()).await;

        blacklist
            .replace(vec!["Discord.exe".to_string(), "  ".to_string()])
            .await
            .unwrap();

        assert!(blacklist.contains("discord.exe").await);
        let persisted = fs::read_to_string(&path).await.unwrap();
        assert_eq!(persisted, "discord.exe");
    }
}

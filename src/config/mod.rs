// src/config/mod.rs
// Process configuration: CLI flags (spec §6) plus operational knobs every
// long-running daemon needs, following the teacher's domain-config split.

use clap::Parser;
use std::path::PathBuf;

/// waddle — local-first capture and retrieval engine for desktop activity.
#[derive(Parser, Debug, Clone)]
#[command(name = "waddle")]
#[command(version)]
#[command(about = "Capture-and-storage substrate for a personal activity history", long_about = None)]
pub struct CliArgs {
    /// Port for the local HTTP API
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Root directory for the database, vector store, files, and state
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Legacy flat-file root to migrate from, if present (defaults to data_dir/legacy)
    #[arg(long)]
    pub legacy_dir: Option<PathBuf>,

    /// Base URL of the external embedding/completion service
    #[arg(long, env = "WADDLE_AI_BASE_URL", default_value = "http://localhost:11434")]
    pub ai_base_url: String,

    /// Timeout in seconds for calls to the AI service
    #[arg(long, env = "WADDLE_AI_TIMEOUT_SECS", default_value_t = 60)]
    pub ai_timeout_secs: u64,

    /// Foreground-window poll frequency in Hz
    #[arg(long, env = "WADDLE_FOCUS_POLL_HZ", default_value_t = 2)]
    pub focus_poll_hz: u64,

    /// Debounce window in milliseconds before a focus transition commits
    #[arg(long, env = "WADDLE_FOCUS_DEBOUNCE_MS", default_value_t = 1000)]
    pub focus_debounce_ms: u64,

    /// Screenshot capture interval in seconds while a target is active
    #[arg(long, env = "WADDLE_SCREENSHOT_INTERVAL_SECS", default_value_t = 5)]
    pub screenshot_interval_secs: u64,

    /// Hard cap on a single activity block's duration, in seconds
    #[arg(long, env = "WADDLE_BLOCK_CAP_SECS", default_value_t = 7200)]
    pub block_cap_secs: u64,

    /// Number of concurrent OCR workers
    #[arg(long, env = "WADDLE_OCR_WORKERS", default_value_t = 2)]
    pub ocr_workers: usize,

    /// Bounded OCR job queue depth
    #[arg(long, env = "WADDLE_OCR_QUEUE", default_value_t = 64)]
    pub ocr_queue_depth: usize,

    /// Maximum retry attempts for a queued embedding job before it is dropped
    #[arg(long, env = "WADDLE_EMBED_MAX_ATTEMPTS", default_value_t = 5)]
    pub embed_max_attempts: u32,

    /// Bounded embedding-upsert job queue depth
    #[arg(long, env = "WADDLE_EMBED_QUEUE", default_value_t = 64)]
    pub embed_queue_depth: usize,

    /// `tracing_subscriber::EnvFilter` directive, e.g. "info" or "waddle=debug"
    #[arg(long, env = "WADDLE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl CliArgs {
    /// Resolve the data directory: explicit flag, else an OS-standard
    /// documents folder subdirectory, matching spec §6's on-disk layout.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::document_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("waddle")
        })
    }

    pub fn resolved_legacy_dir(&self) -> PathBuf {
        self.legacy_dir
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("legacy"))
    }
}

/// Fully resolved runtime configuration, derived once from `CliArgs`.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub legacy_dir: PathBuf,
    pub ai_base_url: String,
    pub ai_timeout_secs: u64,
    pub focus_poll_hz: u64,
    pub focus_debounce_ms: u64,
    pub screenshot_interval_secs: u64,
    pub block_cap_secs: u64,
    pub ocr_workers: usize,
    pub ocr_queue_depth: usize,
    pub embed_max_attempts: u32,
    pub embed_queue_depth: usize,
    pub log_level: String,
}

impl From<CliArgs> for Config {
    fn from(args: CliArgs) -> Self {
        Self {
            port: args.port,
            data_dir: args.resolved_data_dir(),
            legacy_dir: args.resolved_legacy_dir(),
            ai_base_url: args.ai_base_url,
            ai_timeout_secs: args.ai_timeout_secs,
            focus_poll_hz: args.focus_poll_hz,
            focus_debounce_ms: args.focus_debounce_ms,
            screenshot_interval_secs: args.screenshot_interval_secs,
            block_cap_secs: args.block_cap_secs,
            ocr_workers: args.ocr_workers,
            ocr_queue_depth: args.ocr_queue_depth,
            embed_max_attempts: args.embed_max_attempts,
            embed_queue_depth: args.embed_queue_depth,
            log_level: args.log_level,
        }
    }
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("waddle.db")
    }

    pub fn vectors_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.data_dir.join("profile")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backup")
    }

    pub fn blacklist_path(&self) -> PathBuf {
        self.data_dir.join("blacklist.txt")
    }

    pub fn migration_state_path(&self) -> PathBuf {
        self.data_dir.join("migration_state.json")
    }

    pub fn api_secret_path(&self) -> PathBuf {
        self.data_dir.join("api_secret.dat")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let args = CliArgs::parse_from(["waddle"]);
        assert_eq!(args.port, 8080);
        assert!(args.data_dir.is_none());
    }

    #[test]
    fn explicit_data_dir_wins() {
        let args = CliArgs::parse_from(["waddle", "--data-dir", "/tmp/wd"]);
        assert_eq!(args.resolved_data_dir(), PathBuf::from("/tmp/wd"));
    }

    #[test]
    fn legacy_dir_defaults_under_data_dir() {
        let args = CliArgs::parse_from(["waddle", "--data-dir", "/tmp/wd"]);
        assert_eq!(args.resolved_legacy_dir(), PathBuf::from("/tmp/wd/legacy"));
    }

    #[test]
    fn config_paths_match_layout() {
        let args = CliArgs::parse_from(["waddle", "--data-dir", "/tmp/wd"]);
        let cfg: Config = args.into();
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/wd/waddle.db"));
        assert_eq!(cfg.vectors_dir(), PathBuf::from("/tmp/wd/vectors"));
    }
}

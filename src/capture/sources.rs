// src/capture/sources.rs
// Pluggable OS-specific capture sources (spec §4.7). Real implementations
// are platform collaborators outside this crate's scope; this module
// defines the trait seams plus fixture implementations used in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq)]
pub struct FocusEvent {
    pub ts: DateTime<Utc>,
    pub pid: u32,
    pub process_name: String,
    pub window_title: String,
    pub window_handle: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardEvent {
    pub ts: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredExtract {
    pub text: String,
    pub attrs: std::collections::HashMap<String, String>,
}

#[async_trait]
pub trait FocusSource: Send + Sync {
    async fn poll(&self) -> AppResult<Option<FocusEvent>>;
}

#[async_trait]
pub trait ClipboardSource: Send + Sync {
    async fn poll(&self) -> AppResult<Option<ClipboardEvent>>;
}

#[async_trait]
pub trait ScreenshotSource: Send + Sync {
    async fn capture(&self, window_handle: u64) -> AppResult<Vec<u8>>;
}

#[async_trait]
pub trait OcrSource: Send + Sync {
    async fn extract(&self, bytes: &[u8]) -> AppResult<String>;
}

#[async_trait]
pub trait AccessibilitySource: Send + Sync {
    /// Returns `None` when the source has no usable structured text,
    /// signalling the pipeline to fall back to OCR for this screenshot.
    async fn extract_structured(&self, window_handle: u64) -> AppResult<Option<StructuredExtract>>;
}

/// Scripted focus source driven by a fixed sequence, for pipeline tests.
pub struct ScriptedFocusSource {
    events: parking_lot::Mutex<std::collections::VecDeque<FocusEvent>>,
}

impl ScriptedFocusSource {
    pub fn new(events: Vec<FocusEvent>) -> Self {
        Self {
            events: parking_lot::Mutex::new(events.into()),
        }
    }
}

#[async_trait]
impl FocusSource for ScriptedFocusSource {
    async fn poll(&self) -> AppResult<Option<FocusEvent>> {
        Ok(self.events.lock().pop_front())
    }
}

/// Clipboard source that never emits anything, for tests that don't
/// exercise clipboard attribution.
pub struct NullClipboardSource;

#[async_trait]
impl ClipboardSource for NullClipboardSource {
    async fn poll(&self) -> AppResult<Option<ClipboardEvent>> {
        Ok(None)
    }
}

/// Screenshot source returning a fixed PNG fixture.
pub struct FixedScreenshotSource {
    pub bytes: Vec<u8>,
}

#[async_trait]
impl ScreenshotSource for FixedScreenshotSource {
    async fn capture(&self, _window_handle: u64) -> AppResult<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

/// OCR source returning a fixed string, for deterministic pipeline tests.
pub struct FixedOcrSource {
    pub text: String,
}

#[async_trait]
impl OcrSource for FixedOcrSource {
    async fn extract(&self, _bytes: &[u8]) -> AppResult<String> {
        Ok(self.text.clone())
    }
}

/// Accessibility source that always reports unavailable, forcing OCR
/// fallback — the common case for most real window toolkits.
pub struct UnavailableAccessibilitySource;

#[async_trait]
impl AccessibilitySource for UnavailableAccessibilitySource {
    async fn extract_structured(&self, _window_handle: u64) -> AppResult<Option<StructuredExtract>> {
        Ok(None)
    }
}

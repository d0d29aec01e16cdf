// src/ai/mod.rs
// C9: AI Client — thin wrapper over the local embedding/completion service.
// Any non-2xx response, timeout, or dial error degrades to `None`/graceful
// unavailability rather than propagating as a hard error; callers decide
// whether that's fatal (chat) or survivable (search).

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::AppResult;

pub struct AiClient {
    http: Client,
    base_url: String,
}

impl AiClient {
    pub fn new(base_url: String, timeout: Duration) -> AppResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// Returns `Ok(None)` on any failure that should be treated as the
    /// embedder being unavailable (non-2xx, timeout, connection refused).
    pub async fn embed(&self, text: &str) -> AppResult<Option<Vec<f32>>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = json!({ "input": text });

        let response = match self.http.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("embedding request failed: {e}");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            warn!("embedding request returned {}", response.status());
            return Ok(None);
        }

        let raw: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("embedding response was not valid JSON: {e}");
                return Ok(None);
            }
        };

        let vector = raw
            .get("embedding")
            .and_then(|v| v.as_array())
            .or_else(|| raw.get("data").and_then(|d| d.get(0)).and_then(|d| d.get("embedding")).and_then(|v| v.as_array()))
            .map(|arr| arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect::<Vec<f32>>());

        match vector {
            Some(v) if !v.is_empty() => {
                debug!("embedded text ({} chars) into {} dims", text.len(), v.len());
                Ok(Some(v))
            }
            _ => {
                warn!("embedding response had no usable vector");
                Ok(None)
            }
        }
    }

    /// Returns `Ok(None)` on any failure the caller should surface as
    /// `Unavailable` (chat returns 500 on `None`; search degrades to empty).
    pub async fn complete(&self, prompt: &str) -> AppResult<Option<String>> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({ "prompt": prompt, "stream": false });

        let response = match self.http.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("completion request failed: {e}");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            warn!("completion request returned {}", response.status());
            return Ok(None);
        }

        let raw: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("completion response was not valid JSON: {e}");
                return Ok(None);
            }
        };

        let text = raw
            .get("response")
            .and_then(|v| v.as_str())
            .or_else(|| raw.get("text").and_then(|v| v.as_str()))
            .map(str::to_string);

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_builds_with_timeout() {
        let client = AiClient::new("http://localhost:11434".to_string(), Duration::from_secs(5));
        assert!(client.is_ok());
    }
}

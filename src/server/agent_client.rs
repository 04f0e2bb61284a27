//! HTTP client for the filesystem agent
//!
//! All outbound calls carry the configured request timeout so a hung agent
//! never blocks a caller indefinitely. Non-2xx responses are mapped to
//! [`AgentError::Upstream`] with the agent's error message when it sent one.

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::agent::{FileContent, FileNode};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Agent returned {status}: {message}")]
    Upstream { status: StatusCode, message: String },
}

/// Typed client for the agent HTTP API.
#[derive(Clone)]
pub struct AgentClient {
    base_url: String,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// GET /status — liveness probe.
    pub async fn status(&self) -> Result<(), AgentError> {
        let response = self
            .http
            .get(format!("{}/status", self.base_url))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// GET /structure — structure snapshot of `path`.
    pub async fn structure(
        &self,
        path: &Path,
        ignore_patterns: &[String],
    ) -> Result<Vec<FileNode>, AgentError> {
        let response = self
            .http
            .get(format!("{}/structure", self.base_url))
            .query(&[
                ("path", path.to_string_lossy().as_ref()),
                ("ignorePatterns", ignore_patterns.join(",").as_str()),
            ])
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// POST /files/content — best-effort batch read under `base_path`.
    pub async fn file_contents(
        &self,
        base_path: &Path,
        files: &[String],
    ) -> Result<Vec<FileContent>, AgentError> {
        let response = self
            .http
            .post(format!("{}/files/content", self.base_url))
            .json(&json!({
                "basePath": base_path.to_string_lossy(),
                "files": files,
            }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// POST /watch — start watching `path`, notifications to `callback_url`.
    pub async fn start_watch(
        &self,
        path: &Path,
        callback_url: &str,
        ignore_patterns: &[String],
    ) -> Result<(), AgentError> {
        debug!("Agent start_watch {:?} -> {}", path, callback_url);
        let response = self
            .http
            .post(format!("{}/watch", self.base_url))
            .json(&json!({
                "path": path.to_string_lossy(),
                "callbackUrl": callback_url,
                "ignorePatterns": ignore_patterns,
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// POST /unwatch — stop watching `path` (idempotent on the agent side).
    pub async fn stop_watch(&self, path: &Path) -> Result<(), AgentError> {
        debug!("Agent stop_watch {:?}", path);
        let response = self
            .http
            .post(format!("{}/unwatch", self.base_url))
            .json(&json!({ "path": path.to_string_lossy() }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AgentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // The agent sends {"error": "..."} bodies; fall back to raw text.
        let message = match response.text().await {
            Ok(text) => serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text),
            Err(_) => String::new(),
        };
        Err(AgentError::Upstream { status, message })
    }
}

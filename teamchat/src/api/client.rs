//! HTTP client for the agent backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::retry::{retry_with_backoff, RetryPolicy, Sleeper, TokioSleeper};
use crate::config::ClientConfig;

/// Why an analyze request did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// No response was obtained within the retry budget.
    Unreachable,
    /// The backend answered with a non-success status.
    Http(u16),
    /// The backend answered `success: false`.
    Rejected,
    /// The body could not be decoded.
    InvalidResponse,
}

/// Uniform result of an analyze request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip)]
    pub failure: Option<FailureKind>,
}

impl AnalyzeResponse {
    fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            failure: Some(kind),
        }
    }

    /// Human-readable reason for a failed response.
    pub fn reason(&self) -> &str {
        self.message.as_deref().unwrap_or("Request analysis failed")
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    message: &'a str,
    timestamp: DateTime<Utc>,
}

/// Error payload shapes the backend may return.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Reason shown for an HTTP status when the body carries none.
pub fn describe_status(status: u16) -> String {
    let text = match status {
        400 => "The request was invalid",
        401 => "Authentication is required",
        403 => "Access to this resource is forbidden",
        404 => "The requested endpoint does not exist",
        408 => "The backend timed out waiting for the request",
        413 => "The message is too large",
        429 => "Too many requests, please slow down",
        500 => "The backend hit an internal error",
        502 => "Bad gateway in front of the backend",
        503 => "The backend is temporarily unavailable",
        504 => "The backend gateway timed out",
        _ => return format!("HTTP error! status: {status}"),
    };
    format!("{text} (HTTP {status})")
}

/// What the session store needs from the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Submit user content for analysis. Never fails; failures are encoded
    /// in the returned response.
    async fn analyze_request(&self, content: &str) -> AnalyzeResponse;

    /// Whether the backend is reachable and healthy.
    async fn check_health(&self) -> bool;
}

/// reqwest-based [`Backend`].
#[derive(Clone)]
pub struct RequestClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    health_timeout: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl RequestClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.backend_url.clone(),
            retry: config.retry,
            health_timeout: config.health_timeout,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper used between retries.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn probe(&self, url: &str) -> bool {
        match self
            .http
            .get(url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "health probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl Backend for RequestClient {
    async fn analyze_request(&self, content: &str) -> AnalyzeResponse {
        let url = format!("{}/api/agent/analyze", self.base_url);
        let body = AnalyzeRequest {
            message: content,
            timestamp: Utc::now(),
        };

        let sent = retry_with_backoff(&self.retry, self.sleeper.as_ref(), |_| {
            self.http.post(&url).json(&body).send()
        })
        .await;

        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "analyze request exhausted retries");
                return AnalyzeResponse::failure(
                    FailureKind::Unreachable,
                    "Service unreachable. Check your connection and try again.",
                );
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body: ErrorBody = resp.json().await.unwrap_or_default();
            let reason = body
                .message
                .or(body.error)
                .unwrap_or_else(|| describe_status(status.as_u16()));
            warn!(status = status.as_u16(), %reason, "analyze request rejected");
            return AnalyzeResponse::failure(FailureKind::Http(status.as_u16()), reason);
        }

        match resp.json::<AnalyzeResponse>().await {
            Ok(body) if body.success => body,
            Ok(body) => AnalyzeResponse::failure(
                FailureKind::Rejected,
                body.message
                    .unwrap_or_else(|| "Request processing failed".to_string()),
            ),
            Err(e) => AnalyzeResponse::failure(
                FailureKind::InvalidResponse,
                format!("Invalid response from backend: {e}"),
            ),
        }
    }

    async fn check_health(&self) -> bool {
        for path in ["/api/health", "/health"] {
            if self.probe(&format!("{}{path}", self.base_url)).await {
                return true;
            }
        }
        false
    }
}

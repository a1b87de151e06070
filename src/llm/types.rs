use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use crate::pipeline::types::{Location, WeatherObservation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    DeadlineExceeded,
    RateLimited,
    ServerError,
    Network,
    InvalidResponse,
    Auth,
    QuotaExhausted,
    ContentRejected,
    QualityRejected,
    Cancelled,
}

impl FailureKind {
    /// Transient failures may succeed on another attempt.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::RateLimited
                | Self::ServerError
                | Self::Network
                | Self::InvalidResponse
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Network => "network",
            Self::InvalidResponse => "invalid_response",
            Self::Auth => "auth",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ContentRejected => "content_rejected",
            Self::QualityRejected => "quality_rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} failure: {message}")]
pub struct GenerationError {
    pub kind: FailureKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_status(status: StatusCode, detail: &str) -> Self {
        Self::new(
            classify_status(status, detail),
            format!("status {}: {}", status, detail),
        )
    }

    pub fn from_reqwest(err: &reqwest::Error, redacted: String) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_decode() {
            FailureKind::InvalidResponse
        } else if let Some(status) = err.status() {
            classify_status(status, "")
        } else {
            FailureKind::Network
        };
        Self::new(kind, redacted)
    }
}

pub fn classify_status(status: StatusCode, body: &str) -> FailureKind {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return FailureKind::Auth;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let lowered = body.to_lowercase();
        if lowered.contains("quota") || lowered.contains("billing") {
            return FailureKind::QuotaExhausted;
        }
        return FailureKind::RateLimited;
    }
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return FailureKind::Timeout;
    }
    if status.is_server_error() {
        return FailureKind::ServerError;
    }
    FailureKind::ContentRejected
}

#[derive(Debug, Clone, Serialize)]
pub struct StyleConstraints {
    /// Hex colors, primary first.
    pub palette: Vec<String>,
    pub aspect_ratio: String,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub creative_id: usize,
    pub prompt: String,
    pub style: StyleConstraints,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct TextRequest {
    /// Correlates the call with a creative in logs; `None` for one-off calls.
    pub creative_id: Option<usize>,
    pub system_prompt: String,
    pub prompt: String,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, GenerationError>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_text(&self, request: &TextRequest) -> Result<String, GenerationError>;
}

/// Current conditions at a location; `None` means the source is unavailable.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn lookup(&self, location: &Location) -> Option<WeatherObservation>;
}

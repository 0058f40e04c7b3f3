//! Error taxonomy for the discovery pipeline.
//!
//! Every failure the pipeline can observe is classified into one of the
//! kinds below. The kind decides the handling policy: retry inside the
//! fetch layer, contain inside an enrichment source, or abort the session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error kind, carried on progress events and session summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Busy,
    Transient,
    RateLimited,
    Blocked,
    NotFound,
    DataQuality,
    Cancelled,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Busy => "busy",
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Blocked => "blocked",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DataQuality => "data_quality",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main pipeline error type.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session limit reached ({active}/{limit})")]
    Busy { active: usize, limit: usize },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("blocked by upstream: {url}")]
    Blocked { url: String },

    #[error("data quality violation: {message}")]
    DataQuality { message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("fatal: {message}")]
    Fatal { message: String },
}

impl DiscoveryError {
    /// Stable kind for event payloads and policy decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscoveryError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DiscoveryError::Busy { .. } => ErrorKind::Busy,
            DiscoveryError::NotFound { .. } => ErrorKind::NotFound,
            DiscoveryError::Transient { .. } => ErrorKind::Transient,
            DiscoveryError::RateLimited { .. } => ErrorKind::RateLimited,
            DiscoveryError::Blocked { .. } => ErrorKind::Blocked,
            DiscoveryError::DataQuality { .. } => ErrorKind::DataQuality,
            DiscoveryError::Cancelled => ErrorKind::Cancelled,
            DiscoveryError::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    /// Whether the enrichment retry policy may re-attempt this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::RateLimited
        )
    }

    /// Whether the error terminates the whole session rather than one source.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled | ErrorKind::Fatal)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        DiscoveryError::Transient {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        DiscoveryError::Fatal {
            message: message.into(),
        }
    }

    pub fn data_quality(message: impl Into<String>) -> Self {
        DiscoveryError::DataQuality {
            message: message.into(),
        }
    }

    /// Classify an HTTP status the way the fetch layer needs it.
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            403 => DiscoveryError::Blocked {
                url: url.to_string(),
            },
            404 => DiscoveryError::NotFound {
                resource: url.to_string(),
            },
            429 => DiscoveryError::RateLimited { retry_after: None },
            500..=599 => DiscoveryError::Transient {
                message: format!("upstream returned {status} for {url}"),
            },
            _ => DiscoveryError::Transient {
                message: format!("unexpected status {status} for {url}"),
            },
        }
    }
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return DiscoveryError::Transient {
                message: format!("request timed out: {err}"),
            };
        }
        if let Some(status) = err.status() {
            let url = err
                .url()
                .map(|u| u.as_str().to_string())
                .unwrap_or_default();
            return DiscoveryError::from_status(status.as_u16(), &url);
        }
        DiscoveryError::Transient {
            message: format!("request failed: {err}"),
        }
    }
}

impl From<sqlx::Error> for DiscoveryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DiscoveryError::NotFound {
                resource: "row".to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DiscoveryError::Fatal {
                    message: format!("store unreachable: {err}"),
                }
            }
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                DiscoveryError::DataQuality {
                    message: format!("store constraint violated: {db_err}"),
                }
            }
            _ => DiscoveryError::Fatal {
                message: format!("store error: {err}"),
            },
        }
    }
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(err: serde_json::Error) -> Self {
        DiscoveryError::DataQuality {
            message: format!("malformed payload: {err}"),
        }
    }
}

/// Result alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

//! Escalation error taxonomy with retry classification.
//!
//! | Category   | Retriable | Typical source                              |
//! |------------|-----------|---------------------------------------------|
//! | Transient  | yes       | surface timeout, I/O hiccup, store failure  |
//! | RateLimit  | yes       | calendar backend throttling                 |
//! | NotFound   | no        | external object already gone                |
//! | Permanent  | no        | rejected request, corrupt surface state     |
//!
//! The chain driver never retries inside a tick: a retriable failure simply
//! leaves the chain as last persisted and the next scheduled tick re-attempts.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::chain::store::StoreError;

/// Classification used by callers to decide whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Timeout or I/O failure, safe to repeat.
    Transient,
    /// Backend throttling, repeat with back-off.
    RateLimit,
    /// The referenced external object does not exist.
    NotFound,
    /// The request can never succeed as issued.
    Permanent,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimit)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::NotFound => write!(f, "not_found"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Failures reported by an external collaborator (calendar, scheduler).
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("surface call timed out: {0}")]
    Timeout(String),

    #[error("surface rate limit hit: {0}")]
    RateLimited(String),

    #[error("external object not found: {0}")]
    NotFound(String),

    #[error("surface rejected request: {0}")]
    Rejected(String),

    #[error("surface state is corrupt: {0}")]
    Corrupt(String),

    #[error("surface I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("surface backing store error: {0}")]
    Store(#[from] StoreError),
}

impl SurfaceError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Timeout(_) | Self::Io(_) | Self::Store(_) => RetryCategory::Transient,
            Self::RateLimited(_) => RetryCategory::RateLimit,
            Self::NotFound(_) => RetryCategory::NotFound,
            Self::Rejected(_) | Self::Corrupt(_) => RetryCategory::Permanent,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }
}

/// Top-level error for engine entry points.
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("chain store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("invalid escalation window: deadline {deadline} is not after start {start}")]
    InvalidWindow {
        start: DateTime<Utc>,
        deadline: DateTime<Utc>,
    },
}

impl EscalationError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type alias for engine operations
pub type EscalationResult<T> = Result<T, EscalationError>;

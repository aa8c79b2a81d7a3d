//! Weather-specific error types.

use thiserror::Error;

/// Upstream observation fetch failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("timeout")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Service { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Service {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Reading or writing persisted observations failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("data corruption detected: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("corrupt") => {
                Self::Corrupt(err.to_string())
            }
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::CannotOpen
                    || code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                Self::Unavailable(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

/// Errors surfaced by the weather crate's fallible entry points.
///
/// `WeatherCache::load` never returns one of these; failures there land in
/// the published snapshot instead.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Refresh interval must be greater than zero")]
    InvalidInterval,

    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

//! Error types for forgesync
//!
//! Defines the error taxonomy for the sync engine. Uses thiserror for
//! ergonomic error handling.
//!
//! The variants fall into three buckets with different blast radii:
//! - `Config` is fatal at startup; the process must not begin consuming
//!   events with a bad configuration.
//! - `MalformedPayload` and `Unsyncable` are scoped to a single upstream
//!   item; the pipeline logs them and moves on.
//! - `RateLimited` and `Upstream` are transient and retried by the
//!   rate/retry guard before they surface as `UpstreamUnavailable`.

use thiserror::Error;

/// Result type alias for forgesync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type covering all failure modes across the sync engine
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration errors (fatal, startup-only)
    #[error("Configuration error: {0}")]
    Config(String),

    /// An upstream payload is missing required fields; dropped, never retried
    #[error("Malformed upstream payload: {0}")]
    MalformedPayload(String),

    /// Transient upstream API failure (5xx, connection trouble)
    #[error("Upstream API error: {0}")]
    Upstream(String),

    /// Upstream throttled/unreachable past the retry guard's wait cap
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Permanent downstream failure for one item (validation, permissions)
    #[error("Unsyncable item: {0}")]
    Unsyncable(String),

    /// Transient downstream tracker failure (5xx)
    #[error("Tracker error: {0}")]
    Tracker(String),

    /// Rate limited (with retry-after duration in seconds)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Notification dispatch errors
    #[error("Notification error: {0}")]
    Notify(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl crate::upstream::retry::RetryableError for SyncError {
    fn retry_decision(&self) -> crate::upstream::retry::RetryDecision {
        use crate::upstream::retry::RetryDecision;
        use std::time::Duration;

        match self {
            SyncError::Upstream(_) => RetryDecision::Retry,
            SyncError::Tracker(_) => RetryDecision::Retry,
            SyncError::RateLimited(secs) => RetryDecision::RetryAfter(Duration::from_secs(*secs)),
            SyncError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else if let Some(status) = e.status() {
                    match status.as_u16() {
                        429 => RetryDecision::RetryAfter(Duration::from_secs(60)),
                        500..=599 => RetryDecision::Retry,
                        _ => RetryDecision::NoRetry,
                    }
                } else {
                    RetryDecision::NoRetry
                }
            }
            // Everything else is permanent for the item (or the process)
            _ => RetryDecision::NoRetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::retry::{RetryDecision, RetryableError};
    use std::time::Duration;

    #[test]
    fn test_transient_errors_retry() {
        assert_eq!(
            SyncError::Upstream("boom".into()).retry_decision(),
            RetryDecision::Retry
        );
        assert_eq!(
            SyncError::Tracker("502".into()).retry_decision(),
            RetryDecision::Retry
        );
    }

    #[test]
    fn test_rate_limit_honors_retry_after() {
        assert_eq!(
            SyncError::RateLimited(120).retry_decision(),
            RetryDecision::RetryAfter(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_permanent_errors_do_not_retry() {
        assert_eq!(
            SyncError::Config("bad map".into()).retry_decision(),
            RetryDecision::NoRetry
        );
        assert_eq!(
            SyncError::MalformedPayload("no title".into()).retry_decision(),
            RetryDecision::NoRetry
        );
        assert_eq!(
            SyncError::Unsyncable("permission denied".into()).retry_decision(),
            RetryDecision::NoRetry
        );
    }
}

//! Retry with exponential backoff for outbound API calls
//!
//! The rate/retry guard wraps every call the adapters make against the
//! upstream platforms. Throttling responses suspend the current unit of
//! work for the server-indicated (or computed) interval before the same
//! call is retried. Total wait per call is capped; past the cap the call
//! fails with `UpstreamUnavailable`.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{Result, SyncError};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration for a single wait
    pub max_backoff: Duration,

    /// Backoff multiplier (typically 2.0 for exponential backoff)
    pub multiplier: f64,

    /// Add random jitter to prevent thundering herd
    pub jitter: bool,

    /// Cap on cumulative wait per guarded call
    pub max_total_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
            max_total_wait: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    /// Config for rate-limited upstream APIs (longer backoff, bigger cap)
    pub fn for_rate_limited() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: true,
            max_total_wait: Duration::from_secs(900),
        }
    }

    /// Config for quick retries against the downstream tracker
    pub fn quick() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
            max_total_wait: Duration::from_secs(30),
        }
    }

    /// Calculate backoff duration for a given attempt
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let final_duration = if self.jitter {
            // Add 0-25% jitter
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            capped * jitter_factor
        } else {
            capped
        };

        Duration::from_secs_f64(final_duration)
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0) without external dependency
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation
    Retry,
    /// Retry after a specific duration (e.g., from Retry-After header)
    RetryAfter(Duration),
    /// Don't retry, the error is permanent
    NoRetry,
}

/// Trait for errors that can indicate whether to retry
pub trait RetryableError {
    /// Determine if this error should be retried
    fn retry_decision(&self) -> RetryDecision;
}

/// Execute an async operation with retry logic
///
/// Returns the result of the operation, or the last error when attempts
/// are exhausted, or the wait cap is exceeded.
pub async fn with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut waited = Duration::ZERO;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let decision = e.retry_decision();

                match decision {
                    RetryDecision::NoRetry => {
                        debug!(
                            operation = operation_name,
                            attempt = attempt,
                            "Operation failed with non-retryable error: {}",
                            e
                        );
                        return Err(e);
                    }
                    RetryDecision::Retry | RetryDecision::RetryAfter(_) => {
                        if attempt >= config.max_retries {
                            warn!(
                                operation = operation_name,
                                attempts = attempt + 1,
                                "Operation failed after {} attempts: {}",
                                attempt + 1,
                                e
                            );
                            return Err(e);
                        }

                        let backoff = match decision {
                            RetryDecision::RetryAfter(d) => d.min(config.max_backoff),
                            _ => config.backoff_duration(attempt),
                        };

                        if waited + backoff > config.max_total_wait {
                            warn!(
                                operation = operation_name,
                                waited_secs = waited.as_secs_f64(),
                                "Retry wait cap exceeded: {}",
                                e
                            );
                            return Err(SyncError::UpstreamUnavailable(format!(
                                "{}: wait cap exceeded after {:.0}s ({})",
                                operation_name,
                                waited.as_secs_f64(),
                                e
                            )));
                        }

                        warn!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            max_attempts = config.max_retries + 1,
                            backoff_secs = backoff.as_secs_f64(),
                            "Retrying after error: {}",
                            e
                        );

                        sleep(backoff).await;
                        waited += backoff;
                        attempt += 1;
                    }
                }
            }
        }
    }
}

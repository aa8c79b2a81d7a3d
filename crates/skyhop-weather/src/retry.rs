//! Exponential backoff for provider requests.
//!
//! Timeouts, connection failures, 5xx, 408 and 429 are retried. Other 4xx
//! responses (including auth failures) are returned as-is on the first try.

use std::future::Future;
use std::time::Duration;

use reqwest::{Response, StatusCode};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Doubles on every retry
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
    }
}

pub fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

pub fn should_retry_error(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    if error.is_request() {
        return false;
    }
    error.status().is_some_and(should_retry_status)
}

/// Run `send` until it yields a non-retryable outcome or the policy is spent.
///
/// A retryable status on the final attempt is returned as `Ok` so the caller
/// can read the body and report it.
pub async fn send_with_retry<F, Fut>(policy: &RetryPolicy, send: F) -> Result<Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut retry = 0;

    loop {
        let exhausted = retry >= policy.max_retries;

        match send().await {
            Ok(response) => {
                let status = response.status();
                if exhausted && retry > 0 && should_retry_status(status) {
                    tracing::error!(%status, attempts = retry + 1, "Provider retries exhausted");
                }
                if exhausted || !should_retry_status(status) {
                    if retry > 0 {
                        tracing::debug!(retries = retry, %status, "Provider request settled after retry");
                    }
                    return Ok(response);
                }
                tracing::warn!(%status, attempt = retry + 1, "Provider returned retryable status");
            }
            Err(e) => {
                if !should_retry_error(&e) {
                    return Err(e);
                }
                if exhausted {
                    if retry > 0 {
                        tracing::error!(error = %e, attempts = retry + 1, "Provider retries exhausted");
                    }
                    return Err(e);
                }
                tracing::warn!(error = %e, attempt = retry + 1, "Provider request failed, retrying");
            }
        }

        tokio::time::sleep(policy.backoff(retry)).await;
        retry += 1;
    }
}

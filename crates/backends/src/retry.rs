//! Exponential backoff for transient backend failures.
//!
//! [`retry`] repeats idempotent calls on any [`BackendError::is_transient`]
//! failure. Calls with side effects pass a narrower predicate to
//! [`retry_if`]; anything the predicate rejects is returned on the first
//! attempt.

use std::future::Future;
use std::time::Duration;

use crate::error::BackendError;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_attempts: 4,
        }
    }
}

/// Calculate the next backoff delay, clamped to [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run `call` until it succeeds, fails permanently, or runs out of attempts.
pub async fn retry<T, F, Fut>(config: &RetryConfig, operation: &str, call: F) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    retry_if(config, operation, BackendError::is_transient, call).await
}

/// Like [`retry`], but only failures matching `should_retry` are retried.
pub async fn retry_if<T, F, Fut, P>(
    config: &RetryConfig,
    operation: &str,
    should_retry: P,
    mut call: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
    P: Fn(&BackendError) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if should_retry(&e) && attempt < config.max_attempts => {
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient backend failure, retrying",
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, config);
            }
            Err(e) => return Err(e),
        }
    }
}

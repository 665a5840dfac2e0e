//! Bounded waits for remote calls.

use std::future::Future;
use std::time::Duration;

use crate::error::BackendError;

/// Await `call` for at most `limit`. Expiry becomes
/// [`BackendError::Timeout`] converted into the caller's error type.
pub async fn with_timeout<T, E, F>(stage: &'static str, limit: Duration, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<BackendError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(stage, limit_secs = limit.as_secs_f64(), "Remote call timed out");
            Err(BackendError::Timeout {
                stage,
                secs: limit.as_secs(),
            }
            .into())
        }
    }
}

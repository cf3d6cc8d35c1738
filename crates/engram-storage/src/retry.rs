//! Bounded retry for transient storage faults, used by the transaction
//! layer around every blob write.

use crate::Result;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry `operation` on transient faults with exponential backoff, up to
/// `max_attempts` total attempts. Permanent, capacity and cancellation
/// faults propagate immediately.
pub async fn with_retries<T, F, Fut>(what: &str, max_attempts: u32, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_secs(2),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };
    let mut attempt: u32 = 0;
    backoff::future::retry(policy, || {
        attempt += 1;
        let current = attempt;
        let fut = operation();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retriable() && current < max_attempts => {
                    warn!(what, attempt = current, error = %e, "transient storage fault, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}

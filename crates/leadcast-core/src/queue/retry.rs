//! Retry policy and the generic retry combinator.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::Result;

/// Bounded exponential backoff policy.
///
/// Passed by value into [`execute_with_retry`] instead of being baked into
/// call sites, so every retrying path in the service shares one shape.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt after `attempt` (1-based) failed:
    /// `min(base * 2^(attempt-1), max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Runs a fallible task under the given retry policy.
///
/// Authentication-class errors are never retried: retrying with the same
/// stale credential cannot succeed, so they propagate immediately.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted.
pub async fn execute_with_retry<T, F, Fut>(policy: &RetryPolicy, mut task: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match task().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_auth() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_for(attempt);
                debug!(attempt, delay = ?delay, error = %e, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

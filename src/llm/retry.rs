use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ProviderError;

/// Exponential backoff policy for remote calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a call is made at most `max_retries + 1` times
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps; for tests and dry runs
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// A call that ended without success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    /// Calls actually made
    pub attempts: u32,
    pub last_error: ProviderError,
}

/// Run `op` until it succeeds, fails permanently, or the retry budget is spent.
///
/// `op` receives the 0-based attempt number. Transient errors are retried
/// after the policy's backoff; a permanent error returns immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            let delay = policy.backoff_for(attempt);
            debug!(
                "{}: retry {} of {} after {:?}",
                label, attempt, policy.max_retries, delay
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                attempt += 1;
            }
            Err(e) => {
                return Err(RetryExhausted {
                    attempts: attempt + 1,
                    last_error: e,
                });
            }
        }
    }
}

//! Bounded exponential backoff for load-bearing backend calls.
//!
//! Query embedding, entity extraction, answer generation, and batch vector
//! storage have no safe degraded default, so they retry through
//! [`with_backoff`] before the error propagates. Best-effort steps never
//! retry; they log and move on.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::types::RagError;

/// Retry knobs for one call site.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        // attempt is 1-based; shift capped so the multiplier cannot overflow.
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Runs `op` until it succeeds or the policy is exhausted.
///
/// The final error is returned unchanged so callers keep the original
/// taxonomy variant.
pub async fn with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RagError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RagError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    error = %err,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "{label} failed, retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

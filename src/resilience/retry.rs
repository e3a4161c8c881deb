//! Exponential-backoff retry with jitter.
//!
//! Only transient source failures are retried; fatal errors propagate on the
//! first attempt. The pre-jitter schedule is `min(initial × factor^attempt,
//! max_delay)`.

use crate::error::SourceError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for retrying a flaky upstream call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry (milliseconds).
    pub initial_delay_ms: u64,
    /// Multiplier applied per attempt (e.g., 2.0 = doubling).
    pub backoff_factor: f64,
    /// Delay cap (milliseconds).
    pub max_delay_ms: u64,
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Random jitter as a fraction of the delay (e.g., 0.1 = ±10%).
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 32_000,
            max_attempts: 4,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Pre-jitter delay for the given attempt number (0-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        Duration::from_millis(raw.min(self.max_delay_ms as f64) as u64)
    }

    /// Delay with ±jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base = self.base_delay(attempt).as_millis() as f64;
        if self.jitter_fraction <= 0.0 {
            return Duration::from_millis(base as u64);
        }
        let jitter_range = base * self.jitter_fraction;
        let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

/// Run `op` with backoff retries for retryable source errors.
///
/// Fatal errors (circuit open, upstream rejection, exhaustion) are returned
/// immediately; the final retryable error is returned once the attempt
/// budget runs out.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay(attempt);
                debug!(
                    %label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(%label, attempts = attempt + 1, error = %err, "retry budget exhausted");
                }
                return Err(err);
            }
        }
    }
}

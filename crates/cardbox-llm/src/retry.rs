//! Bounded exponential backoff for retryable failures.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Retry policy: attempt count plus backoff bounds.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt after `attempt` (1-based) fails:
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = (self.base_delay.as_millis() as u64).saturating_mul(1_u64 << exponent);
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Run `op`, retrying while `is_retryable` approves and attempts remain.
pub async fn retry_async<T, E, F, Fut>(
    config: &RetryConfig,
    mut is_retryable: impl FnMut(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_attempts && is_retryable(&err) => {
                let delay = config.backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

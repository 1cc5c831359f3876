//! Retry policy for transient store failures.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, StoreError};

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts including the first
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per retry
    pub factor: u32,
    /// Jitter fraction applied to each delay (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            factor: 2,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based), jitter applied.
    fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * f64::from(self.factor.pow(retry));
        let jitter = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_millis((base * (1.0 + jitter)).max(0.0) as u64)
    }
}

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Permanent failures, schema errors, and timeouts surface immediately.
pub async fn with_retry<T, F, Fut>(op_name: &'static str, policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "transient store failure in {} (attempt {}/{}), retrying in {:?}: {}",
                    op_name,
                    attempt + 1,
                    policy.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

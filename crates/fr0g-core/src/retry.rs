//! Exponential backoff with jitter, shared by queue requeues and RPC calls.
//!
//! The same schedule drives two retry surfaces: the router's requeue delay
//! for failed events (`base_delay * 2^retries`, capped) and the in-call
//! retry loop of RPC clients for transient errors.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// Backoff schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retry attempts after the initial one.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on the computed delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Randomization factor in `[0.0, 1.0]`; 0.25 means +/- 25%.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `retries + 1`, with jitter applied.
    ///
    /// `retries` is the number of attempts already consumed, so the first
    /// requeue waits roughly `base_delay_ms` and each subsequent one doubles
    /// until the cap.
    pub fn delay_for(&self, retries: u32) -> Duration {
        let exp = retries.min(20);
        let base = (self.base_delay_ms as f64) * 2f64.powi(exp as i32);
        let capped = base.min(self.max_delay_ms as f64);

        let jitter = capped * self.jitter.clamp(0.0, 1.0);
        let offset = if jitter > 0.0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0.0
        };

        Duration::from_millis((capped + offset).max(0.0) as u64)
    }

    /// Delay without jitter, for callers that need a deterministic schedule.
    pub fn flat_delay_for(&self, retries: u32) -> Duration {
        let exp = retries.min(20);
        let base = (self.base_delay_ms as f64) * 2f64.powi(exp as i32);
        Duration::from_millis(base.min(self.max_delay_ms as f64) as u64)
    }
}

/// Run `operation` until it succeeds, a non-transient error appears, or the
/// retry budget is spent.
///
/// Only errors classified transient by [`PlatformError::is_transient`] are
/// retried; anything else surfaces immediately. On exhaustion the last
/// error is collapsed to its permanent form.
pub async fn retry<F, Fut, T>(
    name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, PlatformError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = config.delay_for(attempt);
                attempt += 1;
                tracing::debug!(
                    target = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(target = name, attempts = attempt + 1, error = %err, "retries exhausted");
                return Err(err.into_permanent());
            }
            Err(err) => return Err(err),
        }
    }
}

//! Retry delay calculation.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

use crate::policy::RetryPolicy;

/// Largest relative perturbation applied when jitter is on.
pub const JITTER_RATIO: f64 = 0.1;

/// `delay(n) = min(base * multiplier^(n-1), max)` with optional uniform jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffCalculator {
    base_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
    jitter: bool,
}

impl BackoffCalculator {
    pub fn new(base_delay_ms: u64, multiplier: f64, max_delay_ms: u64, jitter: bool) -> Self {
        Self {
            base_delay_ms,
            multiplier: multiplier.max(1.0),
            max_delay_ms,
            jitter,
        }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(
            policy.base_delay_ms,
            policy.backoff_multiplier,
            policy.max_delay_ms,
            policy.jitter,
        )
    }

    /// Capped delay before jitter. `attempt` is 1-indexed; 0 is treated as 1.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = (attempt.max(1) - 1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before the attempt following attempt `attempt`. Jitter never pushes the
    /// delay past the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO));
        let jittered = (delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(jittered.min(self.max_delay_ms))
    }

    /// Pick the delay for `attempt`, hand it to `announce`, then sleep for it.
    pub async fn wait<F>(&self, attempt: u32, announce: F) -> Duration
    where
        F: FnOnce(Duration),
    {
        let delay = self.delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
        announce(delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }
}

//! Backoff policy for transient upstream failures

use rand::Rng as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with jitter for retrying a single request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, for tests
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `retry` (0-indexed)
    ///
    /// Formula: `min(base * 2^retry, max) + random_jitter(0..base)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp_delay = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_ms);
        let jitter = if self.base_delay_ms > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_ms)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }

    /// Block the current thread for the retry delay
    pub fn wait(&self, retry: u32) {
        let delay = self.delay_for_retry(retry);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

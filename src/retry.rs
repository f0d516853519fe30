//! Exponential backoff for status-update conflict retries (C6, P6).
//!
//! Deliberately a plain value rather than a trait: callers construct one,
//! drive it with `next_delay`, and tests substitute [`RetryPolicy::immediate`]
//! so suites don't actually sleep.

use std::time::Duration;

/// Doubling backoff with a bounded attempt count. `start` doubles each
/// attempt: 1s, 2s, 4s, 8s, ... up to `max_attempts` total tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    start: Duration,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            start: Duration::from_secs(1),
            max_attempts: 7,
        }
    }
}

impl RetryPolicy {
    pub fn new(start: Duration, max_attempts: u32) -> Self {
        RetryPolicy { start, max_attempts }
    }

    /// A policy with a zero-length delay, for tests that need real retry
    /// logic to run without real wall-clock time elapsing.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            start: Duration::ZERO,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the given attempt number (1-indexed: the delay before
    /// the *second* try is `delay_for_attempt(1)`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.min(16);
        self.start.saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX))
    }

    /// Run `f` up to `max_attempts` times, retrying only on
    /// [`crate::error::CoreError::Conflict`], sleeping `delay_for_attempt`
    /// between tries. Any other error returns immediately.
    pub async fn retry_on_conflict<T, F, Fut>(&self, mut f: F) -> Result<T, crate::error::CoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, crate::error::CoreError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_conflict() && attempt + 1 < self.max_attempts => {
                    tokio::time::sleep(self.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

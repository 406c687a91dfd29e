//! Backoff between failed refresh attempts.

use std::time::Duration;

use crate::config::RefreshConfig;

/// Exponential backoff capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RefreshConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            // A retry never waits longer than a regular refresh would.
            max_delay: Duration::from_secs(config.retry_max_delay_secs).min(config.interval()),
        }
    }

    /// delay = min(base_delay * 2^(failures-1), max_delay)
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = failures.saturating_sub(1).min(63);
        let factor = 2u64.saturating_pow(exponent);
        let delay = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay.as_millis() as u64))
    }

    /// Delay before the next scheduled attempt.
    pub fn next_delay(&self, interval: Duration, failures: u32) -> Duration {
        match failures {
            0 => interval,
            n => self.backoff(n).min(interval),
        }
    }
}

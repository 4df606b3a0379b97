//! Retry policy for remote calls.

use rand::Rng;
use std::time::Duration;

use crate::config::StorageConfig;

/// Exponential-backoff retry schedule shared by every remote call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_tries: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
        }
    }

    /// Backoff before attempt `attempt` (1-based over the retries), with
    /// jitter so concurrent callers do not retry in lockstep.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        exp.mul_f64(jitter).min(self.max_delay)
    }

    /// Statuses worth another attempt: throttling, timeouts and transient
    /// server failures. Client errors are final.
    pub fn is_retryable(status: u16) -> bool {
        matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_tries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        };
        let early = policy.delay(0);
        let later = policy.delay(4);
        assert!(later >= early);
        for attempt in 0..10 {
            assert!(policy.delay(attempt) <= policy.max_delay);
        }
    }

    #[test]
    fn retryable_statuses() {
        assert!(RetryPolicy::is_retryable(503));
        assert!(RetryPolicy::is_retryable(429));
        assert!(!RetryPolicy::is_retryable(404));
        assert!(!RetryPolicy::is_retryable(412));
    }
}

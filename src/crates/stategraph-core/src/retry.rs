//! Per-node retry policies with exponential backoff.
//!
//! A node marked retryable is re-invoked on failure, alone, up to its
//! attempt limit; the other nodes of the super-step are never re-run on its
//! behalf. Delays grow exponentially and are capped, with optional jitter
//! to spread simultaneous retries.

use rand::Rng;
use std::time::Duration;

/// Configuration for retrying a failed node invocation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: usize,

    /// Delay before the first retry, in seconds
    pub initial_interval: f64,

    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,

    /// Upper bound on the delay, in seconds
    pub max_interval: f64,

    /// Randomize each delay between 0.5x and 1.5x
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another attempt is allowed after `attempts` completed ones.
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let base = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_interval);
        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, 0.5);
        assert_eq!(policy.backoff_factor, 2.0);
        assert!(policy.jitter);
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let policy = RetryPolicy::new(5)
            .with_initial_interval(1.0)
            .with_backoff_factor(2.0)
            .with_jitter(false);

        assert_eq!(policy.backoff_delay(0).as_secs_f64(), 1.0);
        assert_eq!(policy.backoff_delay(1).as_secs_f64(), 2.0);
        assert_eq!(policy.backoff_delay(2).as_secs_f64(), 4.0);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(10)
            .with_initial_interval(10.0)
            .with_max_interval(30.0)
            .with_jitter(false);

        assert_eq!(policy.backoff_delay(6).as_secs_f64(), 30.0);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(5).with_initial_interval(1.0).with_backoff_factor(2.0);
        let base = 4.0; // 1.0 * 2^2
        for _ in 0..20 {
            let delay = policy.backoff_delay(2).as_secs_f64();
            assert!(delay >= base * 0.5 && delay <= base * 1.5);
        }
    }

    #[test]
    fn test_should_retry_stops_at_limit() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}

//! Retry policy with exponential backoff and bounded jitter.

use rand::Rng;
use std::time::Duration;

/// Retry settings for the request dispatcher.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay without jitter: `base * multiplier^attempt`, attempt 0-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(millis.max(0.0).round() as u64)
    }

    /// Backoff plus a uniform jitter in `0..=max_jitter`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy {
            max_jitter: Duration::from_millis(50),
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(2050));
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(0), policy.backoff(0));
    }
}

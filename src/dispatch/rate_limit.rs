//! Sliding-window request limiter.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::VenueError;

/// Width of the sliding window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_millis(1000);

/// Bounds requests per second over a sliding 1000 ms window.
///
/// `check` never sleeps. When the window is full it fails fast with
/// [`VenueError::RateLimited`] carrying how long until the oldest request
/// leaves the window; the caller owns the wait.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Mutex<VecDeque<Instant>>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let max_requests = requests_per_second.max(1) as usize;
        Self {
            max_requests,
            window: Mutex::new(VecDeque::with_capacity(max_requests)),
            checks: AtomicU64::new(0),
        }
    }

    /// Admits one request or returns the time to wait.
    pub fn check(&self) -> Result<(), VenueError> {
        self.checks.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut window = self.window.lock();

        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= RATE_LIMIT_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.max_requests {
            let elapsed = window
                .front()
                .map(|oldest| now.duration_since(*oldest))
                .unwrap_or_default();
            let retry_after = RATE_LIMIT_WINDOW.saturating_sub(elapsed);
            debug!(
                "Rate limit reached ({} req/s), retry after {}ms",
                self.max_requests,
                retry_after.as_millis()
            );
            return Err(VenueError::RateLimited { retry_after });
        }

        window.push_back(now);
        Ok(())
    }

    /// Total number of checks performed, admitted or not.
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }

    /// Requests currently inside the window.
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        self.window
            .lock()
            .iter()
            .filter(|t| now.duration_since(**t) < RATE_LIMIT_WINDOW)
            .count()
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fourth_request_in_window_is_rejected() {
        let limiter = RateLimiter::new(3);

        for _ in 0..3 {
            assert!(limiter.check().is_ok());
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        let err = limiter.check().unwrap_err();
        let wait = err.retry_after().unwrap();
        assert!(wait > Duration::ZERO);
        assert!(wait < RATE_LIMIT_WINDOW);
        assert_eq!(wait, Duration::from_millis(700));
        assert_eq!(limiter.checks(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
        assert_eq!(limiter.in_window(), 2);

        tokio::time::advance(RATE_LIMIT_WINDOW).await;

        assert_eq!(limiter.in_window(), 0);
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        assert_eq!(RateLimiter::new(0).max_requests(), 1);
    }
}

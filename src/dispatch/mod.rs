//! Request dispatcher shared by every outbound venue call.
//!
//! Each attempt goes through the same sequence:
//! 1. Rate-limit check (fails fast with a wait hint)
//! 2. The operation itself, bounded by a per-request timeout
//! 3. On a transient failure, exponential backoff and another attempt
//!
//! Because the limiter runs before retries too, retry storms from many
//! callers stay inside the same throttle as first attempts.

mod rate_limit;
mod retry;

pub use rate_limit::{RateLimiter, RATE_LIMIT_WINDOW};
pub use retry::RetryPolicy;

use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::errors::VenueError;

/// Configuration for the request dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub requests_per_second: u32,
    pub retry: RetryPolicy,
    /// Upper bound on a single attempt. Expiry counts as a network failure.
    pub request_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Rate-limited, retrying executor for venue operations.
#[derive(Debug)]
pub struct RequestDispatcher {
    config: DispatchConfig,
    limiter: RateLimiter,
}

impl RequestDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        let limiter = RateLimiter::new(config.requests_per_second);
        Self { config, limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Runs `operation` under the rate limit and retry policy.
    ///
    /// Network and rate-limit failures are retried up to `max_retries`
    /// times; any other failure is returned immediately. When retries run
    /// out the last error is returned.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, VenueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        let policy = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            let result = match self.limiter.check() {
                Ok(()) => self.run_attempt(&mut operation).await,
                Err(throttled) => Err(throttled),
            };

            match result {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("[{}] Succeeded after {} retries", label, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                    let mut delay = policy.delay(attempt);
                    if let Some(hint) = err.retry_after() {
                        delay = delay.max(hint);
                    }
                    warn!(
                        "[{}] Attempt {} failed: {}. Retrying in {}ms",
                        label,
                        attempt + 1,
                        err,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        error!("[{}] Giving up after {} attempts: {}", label, attempt + 1, err);
                    } else {
                        debug!("[{}] Non-retryable failure: {}", label, err);
                    }
                    return Err(err);
                }
            }
        }
    }

    /// One attempt under the rate limit and timeout, never retried.
    ///
    /// For calls whose failure must surface immediately.
    pub async fn execute_once<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, VenueError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        self.limiter.check()?;
        self.bounded(operation()).await.map_err(|err| {
            debug!("[{}] Single attempt failed: {}", label, err);
            err
        })
    }

    /// Waits until the limiter admits one request.
    ///
    /// For control messages on a stream, which share the request budget but
    /// cannot be failed back to a caller.
    pub async fn throttle(&self, label: &str) {
        loop {
            match self.limiter.check() {
                Ok(()) => return,
                Err(err) => {
                    let wait = err
                        .retry_after()
                        .unwrap_or(RATE_LIMIT_WINDOW)
                        .max(Duration::from_millis(1));
                    debug!("[{}] Throttled, waiting {}ms", label, wait.as_millis());
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn run_attempt<T, F, Fut>(&self, operation: &mut F) -> Result<T, VenueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        self.bounded(operation()).await
    }

    async fn bounded<T, Fut>(&self, attempt: Fut) -> Result<T, VenueError>
    where
        Fut: Future<Output = Result<T, VenueError>>,
    {
        match tokio::time::timeout(self.config.request_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(VenueError::Network(format!(
                "Request timed out after {}ms",
                self.config.request_timeout.as_millis()
            ))),
        }
    }
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

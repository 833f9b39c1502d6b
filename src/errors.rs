//! Error taxonomy shared by the venue adapter, dispatcher and engine.
//!
//! Transient classes (`Network`, `RateLimited`) are retried by the request
//! dispatcher. Everything else is fatal and propagates immediately so a
//! strategy can decide whether to abandon a decision.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VenueError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited, retry after {}ms", .retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Venue error: {0}")]
    Venue(String),
}

impl VenueError {
    /// True for failures the dispatcher retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VenueError::Network(_) | VenueError::RateLimited { .. })
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// Wait hint carried by a rate-limit failure.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            VenueError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            VenueError::Venue(format!("Failed to decode response: {}", err))
        } else {
            VenueError::Network(err.to_string())
        }
    }
}

//! Lifecycle events emitted by the streaming client and the strategy engine.

use chrono::{DateTime, Utc};

use super::market_events::Order;
use crate::connectors::ConnectionState;

/// Signals from the streaming client.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Connection state machine moved.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
        timestamp: DateTime<Utc>,
    },

    /// Transport or protocol failure. Non-fatal; reconnection follows.
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A subscription callback failed or panicked. The connection stays up.
    CallbackFailed {
        key: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Reconnection attempts exhausted. Distinct from a user-initiated close.
    PermanentlyDisconnected {
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
}

/// Signals from the strategy engine.
#[derive(Debug, Clone)]
pub enum StrategyEvent {
    Started {
        market_id: String,
        timestamp: DateTime<Utc>,
    },
    Stopped {
        timestamp: DateTime<Utc>,
    },
    Paused {
        timestamp: DateTime<Utc>,
    },
    Resumed {
        timestamp: DateTime<Utc>,
    },

    /// Order accepted by the venue and tracked locally.
    Order {
        order: Order,
        timestamp: DateTime<Utc>,
    },

    /// Tracked order cancelled at the venue.
    Cancelled {
        order_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Any failure during a tick, placement or cancellation.
    Error {
        context: String,
        message: String,
        /// False for authentication, invalid-order and not-found failures.
        retryable: bool,
        timestamp: DateTime<Utc>,
    },
}

impl StrategyEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StrategyEvent::Started { timestamp, .. } => *timestamp,
            StrategyEvent::Stopped { timestamp } => *timestamp,
            StrategyEvent::Paused { timestamp } => *timestamp,
            StrategyEvent::Resumed { timestamp } => *timestamp,
            StrategyEvent::Order { timestamp, .. } => *timestamp,
            StrategyEvent::Cancelled { timestamp, .. } => *timestamp,
            StrategyEvent::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyEvent::Started { .. } => "started",
            StrategyEvent::Stopped { .. } => "stopped",
            StrategyEvent::Paused { .. } => "paused",
            StrategyEvent::Resumed { .. } => "resumed",
            StrategyEvent::Order { .. } => "order",
            StrategyEvent::Cancelled { .. } => "cancelled",
            StrategyEvent::Error { .. } => "error",
        }
    }
}

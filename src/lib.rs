//! market-sync: resilient market-data synchronization and order plumbing for
//! prediction-market venues.
//!
//! # Architecture
//!
//! - **Streaming client**: one persistent connection per venue with a
//!   reconnection state machine, heartbeat and subscriptions that survive
//!   reconnects
//! - **Orderbook cache**: latest depth per asset, fed by the stream
//! - **Request dispatcher**: sliding-window rate limit and retry with backoff
//!   around every outbound venue call
//! - **Strategy engine**: fixed-rate ticks that refresh venue state, consult
//!   a [`strategy::Strategy`] and place or cancel orders
//!
//! Raw venue payloads are normalized in `connectors` and never leave it.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use market_sync::connectors::{PolymarketApiClient, PolymarketStreamProtocol, StreamingClient};
//! use market_sync::dispatch::RequestDispatcher;
//! use market_sync::events::event_channel;
//! use market_sync::orderbook::OrderbookCache;
//! use market_sync::strategy::{SpreadQuoter, StrategyEngine};
//! use market_sync::watchers::OrderBookWatcher;
//! use market_sync::SyncConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::from_env()?;
//!     let cache = Arc::new(OrderbookCache::new());
//!     let dispatcher = Arc::new(RequestDispatcher::new(config.dispatch.clone()));
//!
//!     let (stream_events, _stream_rx) = event_channel(config.event_capacity);
//!     let stream = StreamingClient::new(
//!         config.stream.clone(),
//!         Arc::new(PolymarketStreamProtocol::new()),
//!         dispatcher.clone(),
//!         stream_events,
//!     );
//!
//!     let venue = Arc::new(PolymarketApiClient::new(None)?);
//!     let (engine_events, _engine_rx) = event_channel(config.event_capacity);
//!     let engine = StrategyEngine::new(
//!         config.engine.clone(),
//!         "12345",
//!         venue,
//!         dispatcher,
//!         cache.clone(),
//!         Box::new(SpreadQuoter::new(config.quoter.clone())),
//!         engine_events,
//!     );
//!
//!     engine.start().await?;
//!     if let Some(market) = engine.market() {
//!         OrderBookWatcher::new(stream, cache).watch_market(&market).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connectors;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod orderbook;
pub mod strategy;
pub mod utils;
pub mod venue;
pub mod watchers;

// Re-export commonly used types
pub use config::SyncConfig;
pub use connectors::{ConnectionState, StreamingClient};
pub use dispatch::RequestDispatcher;
pub use errors::VenueError;
pub use orderbook::OrderbookCache;
pub use strategy::{StrategyEngine, StrategyState};
pub use venue::VenueAdapter;

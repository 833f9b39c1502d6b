//! Connectors for Polymarket APIs.
//!
//! - `websocket`: venue-agnostic streaming client (state machine, heartbeat,
//!   reconnect) driven by a [`StreamProtocol`]
//! - `polymarket_stream`: market-channel framing for that client
//! - `polymarket`: REST venue adapter with L2-signed CLOB calls
//!
//! Raw payloads stop here; everything leaving this module is a normalized
//! record from the events layer.

mod auth;
mod polymarket;
mod polymarket_stream;
mod protocol;
pub mod websocket;

pub use auth::{ApiCredentials, AuthError};
pub use polymarket::{Endpoints, OrderSigner, PolymarketApiClient};
pub use polymarket_stream::{PolymarketStreamProtocol, DEFAULT_MARKET_WS_URL};
pub use protocol::{Inbound, StreamProtocol};
pub use websocket::{ConnectionState, StreamCallback, StreamConfig, StreamError, StreamingClient};

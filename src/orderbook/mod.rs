//! Orderbook cache fed by the streaming client.

mod cache;

pub use cache::OrderbookCache;

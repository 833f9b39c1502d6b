//! Watchers that bind venue streams to local state.

mod orderbook_watcher;

pub use orderbook_watcher::OrderBookWatcher;

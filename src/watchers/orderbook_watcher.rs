//! Order book watcher: binds a market's outcome tokens to the cache.
//!
//! The streaming client owns the connection and reconnects on its own; this
//! watcher only registers one callback per token that writes every book
//! snapshot into the shared [`OrderbookCache`].

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::connectors::{StreamError, StreamingClient};
use crate::events::{Market, StreamMessage};
use crate::orderbook::OrderbookCache;

/// Interval between readiness checks in [`OrderBookWatcher::wait_until_ready`].
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Keeps the cache in sync with the outcome tokens of one market.
pub struct OrderBookWatcher {
    stream: StreamingClient,
    cache: Arc<OrderbookCache>,
    market_id: Option<String>,
    tokens: Vec<String>,
}

impl OrderBookWatcher {
    pub fn new(stream: StreamingClient, cache: Arc<OrderbookCache>) -> Self {
        Self {
            stream,
            cache,
            market_id: None,
            tokens: Vec::new(),
        }
    }

    /// Subscribes to every outcome token of `market`, replacing any market
    /// watched before.
    pub async fn watch_market(&mut self, market: &Market) -> Result<(), StreamError> {
        if !self.tokens.is_empty() {
            self.unwatch_all().await;
        }

        let tokens = market.token_ids();
        info!(
            "[{}] Watching {} outcome token(s)",
            market.id,
            tokens.len()
        );

        for token in &tokens {
            let cache = Arc::clone(&self.cache);
            let expected = token.clone();
            self.stream
                .watch(token.clone(), move |message| {
                    apply_message(&cache, &expected, message);
                    Ok(())
                })
                .await?;
        }

        self.market_id = Some(market.id.clone());
        self.tokens = tokens;
        Ok(())
    }

    /// Unsubscribes every watched token and drops its cached book.
    pub async fn unwatch_all(&mut self) {
        for token in self.tokens.drain(..) {
            if let Err(e) = self.stream.unwatch(&token).await {
                warn!("[{}] Unsubscribe failed: {}", token, e);
            }
            self.cache.remove(&token);
        }

        if let Some(market_id) = self.market_id.take() {
            info!("[{}] OrderBookWatcher stopped", market_id);
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// True once every watched token has a two-sided book.
    pub fn is_ready(&self) -> bool {
        !self.tokens.is_empty() && self.cache.has_all_data(&self.tokens)
    }

    /// Polls until [`Self::is_ready`] or the timeout elapses.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_ready() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                debug!("Books not ready after {}ms", timeout.as_millis());
                return false;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

/// Writes a book into the cache. Trades are informational only.
fn apply_message(cache: &OrderbookCache, token: &str, message: &StreamMessage) {
    match message {
        StreamMessage::Book(book) => {
            if book.asset_id != token {
                debug!("[{}] Ignoring book for unknown token: {}", token, book.asset_id);
                return;
            }
            trace!(
                "[{}] Book: {} bids, {} asks",
                token,
                book.bids.len(),
                book.asks.len()
            );
            cache.update(book.asset_id.clone(), book.clone());
        }
        StreamMessage::LastTrade(trade) => {
            trace!("[{}] Trade @ {}", token, trade.price);
        }
    }
}

impl std::fmt::Debug for OrderBookWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBookWatcher")
            .field("market_id", &self.market_id)
            .field("tokens", &self.tokens)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{PolymarketStreamProtocol, StreamConfig};
    use crate::dispatch::RequestDispatcher;
    use crate::events::{EventSink, OrderbookSnapshot, PriceLevel, TradeUpdate};
    use crate::venue::mock::test_market;
    use chrono::Utc;

    fn book(asset_id: &str) -> StreamMessage {
        StreamMessage::Book(OrderbookSnapshot::new(
            asset_id,
            "m",
            vec![PriceLevel::new(0.48, 5.0)],
            vec![PriceLevel::new(0.52, 5.0)],
            Utc::now(),
        ))
    }

    #[test]
    fn test_apply_message_updates_cache() {
        let cache = OrderbookCache::new();
        apply_message(&cache, "yes-token", &book("yes-token"));
        assert!(cache.has_data("yes-token"));

        // Mismatched key is ignored.
        apply_message(&cache, "yes-token", &book("other"));
        assert!(!cache.has_data("other"));

        let trade = StreamMessage::LastTrade(TradeUpdate {
            asset_id: "no-token".into(),
            market_id: "m".into(),
            price: 0.4,
            size: None,
            side: None,
            timestamp: Utc::now(),
        });
        apply_message(&cache, "no-token", &trade);
        assert!(!cache.has_data("no-token"));
    }

    #[tokio::test]
    async fn test_watch_market_on_closed_stream_fails() {
        let stream = StreamingClient::new(
            StreamConfig::default(),
            Arc::new(PolymarketStreamProtocol::new()),
            Arc::new(RequestDispatcher::default()),
            EventSink::disabled(),
        );
        stream.disconnect().await;

        let cache = Arc::new(OrderbookCache::new());
        let mut watcher = OrderBookWatcher::new(stream, Arc::clone(&cache));

        let result = watcher.watch_market(&test_market("m1")).await;
        assert!(matches!(result, Err(StreamError::Closed)));
        assert!(watcher.tokens().is_empty());
        assert!(!watcher.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_times_out_without_tokens() {
        let stream = StreamingClient::new(
            StreamConfig::default(),
            Arc::new(PolymarketStreamProtocol::new()),
            Arc::new(RequestDispatcher::default()),
            EventSink::disabled(),
        );
        let watcher = OrderBookWatcher::new(stream, Arc::new(OrderbookCache::new()));
        assert!(!watcher.wait_until_ready(Duration::from_millis(200)).await);
    }
}

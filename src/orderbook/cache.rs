//! Latest-snapshot orderbook store keyed by asset id.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::events::{OrderbookSnapshot, PriceLevel};

/// In-memory per-asset orderbook cache.
///
/// Every `update` replaces the stored snapshot wholesale. There is no
/// timestamp or sequence guard: a late-arriving older snapshot overwrites a
/// newer one. Writes come only from the streaming client's message path;
/// reads come from strategy ticks.
#[derive(Debug, Default)]
pub struct OrderbookCache {
    books: RwLock<HashMap<String, OrderbookSnapshot>>,
}

impl OrderbookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot stored for `asset_id`.
    pub fn update(&self, asset_id: impl Into<String>, snapshot: OrderbookSnapshot) {
        self.books.write().insert(asset_id.into(), snapshot);
    }

    /// Returns the last snapshot stored for `asset_id`.
    pub fn get(&self, asset_id: &str) -> Option<OrderbookSnapshot> {
        self.books.read().get(asset_id).cloned()
    }

    pub fn remove(&self, asset_id: &str) -> Option<OrderbookSnapshot> {
        self.books.write().remove(asset_id)
    }

    pub fn best_bid(&self, asset_id: &str) -> Option<PriceLevel> {
        self.books.read().get(asset_id)?.bids.first().copied()
    }

    pub fn best_ask(&self, asset_id: &str) -> Option<PriceLevel> {
        self.books.read().get(asset_id)?.asks.first().copied()
    }

    /// Mean of best bid and best ask.
    pub fn mid_price(&self, asset_id: &str) -> Option<f64> {
        let (bid, ask) = self.top_of_book(asset_id)?;
        Some((bid + ask) / 2.0)
    }

    /// Best ask minus best bid.
    pub fn spread(&self, asset_id: &str) -> Option<f64> {
        let (bid, ask) = self.top_of_book(asset_id)?;
        Some(ask - bid)
    }

    /// True iff a snapshot exists and both of its sides are non-empty.
    ///
    /// `best_bid`/`best_ask` returning `None` cannot tell "never received a
    /// snapshot" apart from "empty book"; this can.
    pub fn has_data(&self, asset_id: &str) -> bool {
        self.books
            .read()
            .get(asset_id)
            .map(OrderbookSnapshot::is_two_sided)
            .unwrap_or(false)
    }

    /// Readiness gate: `has_data` holds for every id.
    pub fn has_all_data<I, S>(&self, asset_ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let books = self.books.read();
        asset_ids.into_iter().all(|id| {
            books
                .get(id.as_ref())
                .map(OrderbookSnapshot::is_two_sided)
                .unwrap_or(false)
        })
    }

    pub fn asset_ids(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    fn top_of_book(&self, asset_id: &str) -> Option<(f64, f64)> {
        let books = self.books.read();
        let book = books.get(asset_id)?;
        let bid = book.bids.first()?.price;
        let ask = book.asks.first()?.price;
        Some((bid, ask))
    }
}

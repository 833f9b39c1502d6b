//! Normalized market records shared by every layer.
//!
//! Venue adapters and stream protocols convert raw payloads into these types
//! before anything else sees them. Raw JSON never reaches the cache or the
//! strategy engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Lenient parse of venue side strings ("buy", "BUY", "Bid").
    pub fn parse(raw: &str) -> Option<Side> {
        match raw.to_ascii_uppercase().as_str() {
            "BUY" | "BID" => Some(Side::Buy),
            "SELL" | "ASK" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single price level in the order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

impl PriceLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }

    /// Parses a level from the string pair venues put on the wire.
    pub fn parse(price: &str, size: &str) -> Option<Self> {
        let price = price.trim().parse::<f64>().ok()?;
        let size = size.trim().parse::<f64>().ok()?;
        Some(Self { price, size })
    }

    fn is_valid(&self) -> bool {
        self.price.is_finite() && self.size.is_finite() && self.price > 0.0 && self.size > 0.0
    }
}

/// Complete bid/ask depth for one asset at one instant.
///
/// Built only through [`OrderbookSnapshot::new`], which drops non-positive
/// levels and sorts bids descending and asks ascending, so index 0 of each
/// side is always the top of book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub asset_id: String,
    pub market_id: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderbookSnapshot {
    pub fn new(
        asset_id: impl Into<String>,
        market_id: impl Into<String>,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut bids: Vec<PriceLevel> = bids.into_iter().filter(PriceLevel::is_valid).collect();
        let mut asks: Vec<PriceLevel> = asks.into_iter().filter(PriceLevel::is_valid).collect();

        bids.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal));
        asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal));

        Self {
            asset_id: asset_id.into(),
            market_id: market_id.into(),
            bids,
            asks,
            timestamp,
        }
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Both sides have at least one level.
    pub fn is_two_sided(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }
}

/// Last traded price for an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub asset_id: String,
    pub market_id: String,
    pub price: f64,
    pub size: Option<f64>,
    pub side: Option<Side>,
    pub timestamp: DateTime<Utc>,
}

/// A decoded streaming update, routed by its asset key.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Book(OrderbookSnapshot),
    LastTrade(TradeUpdate),
}

impl StreamMessage {
    /// Subscription key this update is dispatched to.
    pub fn key(&self) -> &str {
        match self {
            StreamMessage::Book(book) => &book.asset_id,
            StreamMessage::LastTrade(trade) => &trade.asset_id,
        }
    }
}

/// One tradable outcome of a market (e.g. "Yes" / "No").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    pub token_id: String,
    pub price: Option<f64>,
}

/// A normalized market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub condition_id: String,
    pub question: String,
    pub outcomes: Vec<Outcome>,
    pub active: bool,
    pub closed: bool,
    pub end_date: Option<DateTime<Utc>>,
}

impl Market {
    /// Asset ids of every outcome, in venue order.
    pub fn token_ids(&self) -> Vec<String> {
        self.outcomes.iter().map(|o| o.token_id.clone()).collect()
    }

    /// Looks up an outcome by name, case-insensitively.
    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(name))
    }

    pub fn is_tradable(&self) -> bool {
        self.active && !self.closed
    }
}

/// Venue-reported position. Refreshed wholesale every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub market_id: String,
    pub outcome: String,
    pub size: f64,
    pub average_price: f64,
    pub current_price: f64,
}

impl Position {
    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.average_price) * self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

/// A venue order as reported back by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub market_id: String,
    pub asset_id: String,
    pub outcome: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub filled: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> f64 {
        (self.size - self.filled).max(0.0)
    }
}

/// Everything an adapter needs to build and sign a venue order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: String,
    pub asset_id: String,
    pub outcome: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: f64, size: f64) -> PriceLevel {
        PriceLevel::new(price, size)
    }

    #[test]
    fn test_snapshot_sorts_and_filters_levels() {
        let book = OrderbookSnapshot::new(
            "token",
            "market",
            vec![level(0.40, 10.0), level(0.0, 5.0), level(0.45, 3.0), level(0.42, -1.0)],
            vec![level(0.55, 2.0), level(0.50, 4.0), level(0.60, 0.0)],
            Utc::now(),
        );

        assert_eq!(book.bids, vec![level(0.45, 3.0), level(0.40, 10.0)]);
        assert_eq!(book.asks, vec![level(0.50, 4.0), level(0.55, 2.0)]);
        assert_eq!(book.best_bid().map(|l| l.price), Some(0.45));
        assert_eq!(book.best_ask().map(|l| l.price), Some(0.50));
        assert!(book.is_two_sided());
    }

    #[test]
    fn test_price_level_parse() {
        assert_eq!(PriceLevel::parse("0.52", "100"), Some(level(0.52, 100.0)));
        assert_eq!(PriceLevel::parse("abc", "100"), None);
    }

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("buy"), Some(Side::Buy));
        assert_eq!(Side::parse("SELL"), Some(Side::Sell));
        assert_eq!(Side::parse("hold"), None);
    }

    #[test]
    fn test_market_outcome_lookup() {
        let market = Market {
            id: "1".into(),
            condition_id: "0xabc".into(),
            question: "Will it rain?".into(),
            outcomes: vec![
                Outcome { name: "Yes".into(), token_id: "111".into(), price: Some(0.6) },
                Outcome { name: "No".into(), token_id: "222".into(), price: Some(0.4) },
            ],
            active: true,
            closed: false,
            end_date: None,
        };

        assert_eq!(market.outcome("yes").map(|o| o.token_id.as_str()), Some("111"));
        assert_eq!(market.token_ids(), vec!["111".to_string(), "222".to_string()]);
        assert!(market.is_tradable());
    }

    #[test]
    fn test_position_unrealized_pnl() {
        let position = Position {
            market_id: "m".into(),
            outcome: "Yes".into(),
            size: 100.0,
            average_price: 0.40,
            current_price: 0.50,
        };
        assert!((position.unrealized_pnl() - 10.0).abs() < 1e-9);
    }
}

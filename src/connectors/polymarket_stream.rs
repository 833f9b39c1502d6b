//! Polymarket CLOB market-channel framing.
//!
//! - Subscribe/unsubscribe with `assets_ids` frames
//! - `PING` text keepalive, answered with `PONG`
//! - `book` events carry full depth for one asset and become snapshots
//! - `last_trade_price` events become trade updates
//! - Payloads arrive either as a single object or as an array of objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::protocol::{Inbound, StreamProtocol};
use crate::events::{OrderbookSnapshot, PriceLevel, Side, StreamMessage, TradeUpdate};

/// Default WebSocket URL for the Polymarket market channel.
pub const DEFAULT_MARKET_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Stream protocol for the public Polymarket market channel.
#[derive(Debug, Clone, Default)]
pub struct PolymarketStreamProtocol;

impl PolymarketStreamProtocol {
    pub fn new() -> Self {
        Self
    }

    fn decode_event(&self, payload: serde_json::Value, out: &mut Vec<StreamMessage>) {
        let event_type = payload
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        match event_type.as_str() {
            "book" => match serde_json::from_value::<BookMessage>(payload) {
                Ok(book) => out.push(StreamMessage::Book(book.into_snapshot())),
                Err(e) => debug!("Dropping malformed book event: {}", e),
            },
            "last_trade_price" => match serde_json::from_value::<LastTradePriceMessage>(payload) {
                Ok(trade) => {
                    if let Some(update) = trade.into_update() {
                        out.push(StreamMessage::LastTrade(update));
                    }
                }
                Err(e) => debug!("Dropping malformed trade event: {}", e),
            },
            other => debug!("Ignoring market-channel event type: {}", other),
        }
    }
}

impl StreamProtocol for PolymarketStreamProtocol {
    fn name(&self) -> &str {
        "polymarket-market"
    }

    fn auth_frame(&self) -> Option<String> {
        None
    }

    fn subscribe_frame(&self, keys: &[String]) -> String {
        let msg = SubscriptionMessage {
            assets_ids: keys,
            type_: "market",
            operation: "subscribe",
        };
        serde_json::to_string(&msg).unwrap_or_default()
    }

    fn unsubscribe_frame(&self, keys: &[String]) -> String {
        let msg = SubscriptionMessage {
            assets_ids: keys,
            type_: "market",
            operation: "unsubscribe",
        };
        serde_json::to_string(&msg).unwrap_or_default()
    }

    fn heartbeat_frame(&self) -> String {
        "PING".to_string()
    }

    fn decode(&self, text: &str) -> Result<Inbound, String> {
        let payload: serde_json::Value =
            serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;

        let mut messages = Vec::new();
        match payload {
            serde_json::Value::Array(items) => {
                for item in items {
                    self.decode_event(item, &mut messages);
                }
            }
            serde_json::Value::Object(_) => self.decode_event(payload, &mut messages),
            other => return Err(format!("unexpected payload: {}", other)),
        }

        if messages.is_empty() {
            Ok(Inbound::Ignored)
        } else {
            Ok(Inbound::Messages(messages))
        }
    }
}

// ============ Message Types ============

#[derive(Debug, Serialize)]
struct SubscriptionMessage<'a> {
    assets_ids: &'a [String],
    #[serde(rename = "type")]
    type_: &'a str,
    operation: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct BookMessage {
    asset_id: String,
    #[serde(default)]
    market: Option<String>,
    #[serde(default, alias = "buys")]
    bids: Vec<BookLevel>,
    #[serde(default, alias = "sells")]
    asks: Vec<BookLevel>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl BookMessage {
    fn into_snapshot(self) -> OrderbookSnapshot {
        let parse = |levels: Vec<BookLevel>| -> Vec<PriceLevel> {
            levels
                .iter()
                .filter_map(|l| PriceLevel::parse(&l.price, &l.size))
                .collect()
        };

        OrderbookSnapshot::new(
            self.asset_id,
            self.market.unwrap_or_default(),
            parse(self.bids),
            parse(self.asks),
            parse_timestamp(self.timestamp.as_deref()),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BookLevel {
    price: String,
    size: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LastTradePriceMessage {
    asset_id: String,
    #[serde(default)]
    market: Option<String>,
    price: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl LastTradePriceMessage {
    fn into_update(self) -> Option<TradeUpdate> {
        let price = self.price.parse::<f64>().ok()?;
        Some(TradeUpdate {
            asset_id: self.asset_id,
            market_id: self.market.unwrap_or_default(),
            price,
            size: self.size.and_then(|s| s.parse::<f64>().ok()),
            side: self.side.as_deref().and_then(Side::parse),
            timestamp: parse_timestamp(self.timestamp.as_deref()),
        })
    }
}

/// Venue timestamps are unix milliseconds as strings.
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

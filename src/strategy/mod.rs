//! Tick-driven strategy engine and the decision seam it drives.
//!
//! ```text
//! ticker ──▶ refresh (positions ∥ open orders, via dispatcher)
//!              │
//!              ▼
//!        Strategy::on_tick(TickContext) ──▶ Vec<Decision>
//!              │
//!              ▼
//!        place / cancel (via dispatcher) ──▶ StrategyEvent
//! ```

mod engine;
mod spread_quoter;

pub use engine::{EngineConfig, EngineError, StrategyEngine, StrategyState};
pub use spread_quoter::{SpreadQuoter, SpreadQuoterConfig};

use crate::events::{Market, Order, Position, Side};
use crate::orderbook::OrderbookCache;

/// Read-only view handed to a strategy on every tick.
pub struct TickContext<'a> {
    pub market: &'a Market,
    /// Positions as just reported by the venue.
    pub positions: &'a [Position],
    /// Open orders as just reported by the venue.
    pub open_orders: &'a [Order],
    /// Orders this engine placed and still considers open.
    pub tracked_orders: &'a [Order],
    pub cache: &'a OrderbookCache,
}

/// What a strategy wants to trade. The engine fills in the market.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub asset_id: String,
    pub outcome: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Place(OrderIntent),
    Cancel { order_id: String },
}

/// Decision callback invoked once per tick.
///
/// Errors and panics are caught by the engine, reported as
/// [`crate::events::StrategyEvent::Error`], and the schedule carries on.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn on_tick(&mut self, ctx: &TickContext<'_>) -> anyhow::Result<Vec<Decision>>;
}

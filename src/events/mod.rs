//! Event and record types.
//!
//! All external signals are converted into these normalized types before the
//! cache, the engine or user strategies consume them.

mod bus;
mod engine_events;
mod market_events;

pub use bus::{event_channel, EventSink, DEFAULT_EVENT_CAPACITY};
pub use engine_events::{StrategyEvent, StreamEvent};
pub use market_events::{
    Market, Order, OrderRequest, OrderStatus, OrderbookSnapshot, Outcome, Position, PriceLevel,
    Side, StreamMessage, TradeUpdate,
};

//! Venue adapter seam.
//!
//! An adapter turns venue REST payloads into the normalized records in
//! [`crate::events`] and performs signed order submission. Everything above
//! this trait (dispatcher, engine, strategies) is venue-agnostic.

use async_trait::async_trait;

use crate::errors::VenueError;
use crate::events::{Market, Order, OrderRequest, Position};

/// Normalized REST surface of a trading venue.
///
/// Implementations classify failures into [`VenueError`] so the request
/// dispatcher can tell transient from fatal.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn fetch_market(&self, market_id: &str) -> Result<Market, VenueError>;

    /// Positions held, optionally restricted to one market.
    async fn fetch_positions(&self, market_id: Option<&str>) -> Result<Vec<Position>, VenueError>;

    /// Orders still resting at the venue, optionally restricted to one market.
    async fn fetch_open_orders(&self, market_id: Option<&str>) -> Result<Vec<Order>, VenueError>;

    async fn create_order(&self, request: &OrderRequest) -> Result<Order, VenueError>;

    /// Cancels one order. An unknown id is `NotFound`.
    async fn cancel_order(&self, order_id: &str, market_id: Option<&str>) -> Result<(), VenueError>;
}

//! Bundled example strategy: joins the best bid on every outcome token.
//!
//! Monitor-only unless `quote_size` is set; it then keeps one resting buy at
//! the best bid per token while the spread is wide enough and the position
//! is under its cap, cancelling quotes the book has moved away from.

use std::collections::HashMap;
use tracing::{debug, info};

use super::{Decision, OrderIntent, Strategy, TickContext};
use crate::events::{Order, Side};

/// Prices closer than this are treated as equal.
const PRICE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct SpreadQuoterConfig {
    /// Size per quote. `None` disables order placement.
    pub quote_size: Option<f64>,
    /// Minimum ask - bid before a quote is placed.
    pub min_spread: f64,
    /// Upper bound on position size per outcome, including the new quote.
    pub max_position: f64,
}

impl Default for SpreadQuoterConfig {
    fn default() -> Self {
        Self {
            quote_size: None,
            min_spread: 0.02,
            max_position: 100.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct SpreadQuoter {
    config: SpreadQuoterConfig,
    last_mid: HashMap<String, f64>,
}

impl SpreadQuoter {
    pub fn new(config: SpreadQuoterConfig) -> Self {
        if let Some(size) = config.quote_size {
            info!(
                "SpreadQuoter quoting {} per token (min spread {}, max position {})",
                size, config.min_spread, config.max_position
            );
        } else {
            info!("SpreadQuoter in monitor-only mode");
        }

        Self {
            config,
            last_mid: HashMap::new(),
        }
    }
}

impl Strategy for SpreadQuoter {
    fn name(&self) -> &str {
        "spread-quoter"
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>) -> anyhow::Result<Vec<Decision>> {
        let mut decisions = Vec::new();

        for outcome in &ctx.market.outcomes {
            let token = &outcome.token_id;
            let (Some(bid), Some(ask)) = (ctx.cache.best_bid(token), ctx.cache.best_ask(token)) else {
                debug!("[{}] No two-sided book yet", token);
                continue;
            };

            let mid = (bid.price + ask.price) / 2.0;
            let spread = ask.price - bid.price;
            let moved = self
                .last_mid
                .insert(token.clone(), mid)
                .map_or(true, |prev| (prev - mid).abs() > PRICE_EPSILON);
            if moved {
                debug!(
                    "[{}] {} mid {:.4} spread {:.4}",
                    token, outcome.name, mid, spread
                );
            }

            let Some(size) = self.config.quote_size else {
                continue;
            };

            let resting: Vec<&Order> = ctx
                .tracked_orders
                .iter()
                .filter(|o| &o.asset_id == token && o.side == Side::Buy)
                .collect();

            let mut has_live_quote = false;
            for order in resting {
                if (order.price - bid.price).abs() <= PRICE_EPSILON {
                    has_live_quote = true;
                } else {
                    debug!(
                        "[{}] Quote {} @ {} is stale (bid {})",
                        token, order.id, order.price, bid.price
                    );
                    decisions.push(Decision::Cancel {
                        order_id: order.id.clone(),
                    });
                }
            }

            let held: f64 = ctx
                .positions
                .iter()
                .filter(|p| p.outcome.eq_ignore_ascii_case(&outcome.name))
                .map(|p| p.size)
                .sum();

            if has_live_quote || spread + PRICE_EPSILON < self.config.min_spread {
                continue;
            }
            if held + size > self.config.max_position {
                debug!("[{}] Position {} at cap, not quoting", token, held);
                continue;
            }

            decisions.push(Decision::Place(OrderIntent {
                asset_id: token.clone(),
                outcome: outcome.name.clone(),
                side: Side::Buy,
                price: bid.price,
                size,
            }));
        }

        Ok(decisions)
    }
}

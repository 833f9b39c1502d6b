//! Strategy engine: lifecycle, tick scheduling and order bookkeeping.
//!
//! Key behaviour:
//! 1. `start` does one non-retried market fetch; failure leaves the engine
//!    stopped
//! 2. The tick schedule is fixed-rate; a tick that would overlap one still in
//!    flight is skipped
//! 3. Tick errors are reported as events and never stop the schedule
//! 4. `stop` waits out an in-flight tick, then cancels every tracked order,
//!    continuing past failures

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::{Decision, OrderIntent, Strategy, TickContext};
use crate::dispatch::RequestDispatcher;
use crate::errors::VenueError;
use crate::events::{EventSink, Market, Order, OrderRequest, Position, StrategyEvent};
use crate::orderbook::OrderbookCache;
use crate::venue::VenueAdapter;

/// Configuration for the strategy engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine is already {0}")]
    AlreadyStarted(StrategyState),

    #[error("Initial market fetch failed: {0}")]
    MarketFetch(#[from] VenueError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyState {
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyState::Stopped => write!(f, "stopped"),
            StrategyState::Running => write!(f, "running"),
            StrategyState::Paused => write!(f, "paused"),
        }
    }
}

/// Runs one [`Strategy`] against one market.
///
/// Cheap to clone; clones drive the same engine.
#[derive(Clone)]
pub struct StrategyEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    market_id: String,
    venue: Arc<dyn VenueAdapter>,
    dispatcher: Arc<RequestDispatcher>,
    cache: Arc<OrderbookCache>,
    strategy: Mutex<Box<dyn Strategy>>,
    state: RwLock<StrategyState>,
    market: RwLock<Option<Market>>,
    positions: RwLock<Vec<Position>>,
    venue_orders: RwLock<Vec<Order>>,
    /// Local mirror of orders this engine placed.
    tracked: Mutex<Vec<Order>>,
    /// Held for the whole of a tick. Ticks `try_lock` it to skip overlaps;
    /// `stop` waits on it so no placement lands after the final cancel sweep.
    tick_gate: tokio::sync::Mutex<()>,
    ticks_completed: AtomicU64,
    ticker: Mutex<Option<JoinHandle<()>>>,
    /// Serializes start and stop.
    lifecycle: tokio::sync::Mutex<()>,
    events: EventSink<StrategyEvent>,
}

impl StrategyEngine {
    pub fn new(
        config: EngineConfig,
        market_id: impl Into<String>,
        venue: Arc<dyn VenueAdapter>,
        dispatcher: Arc<RequestDispatcher>,
        cache: Arc<OrderbookCache>,
        strategy: Box<dyn Strategy>,
        events: EventSink<StrategyEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                market_id: market_id.into(),
                venue,
                dispatcher,
                cache,
                strategy: Mutex::new(strategy),
                state: RwLock::new(StrategyState::Stopped),
                market: RwLock::new(None),
                positions: RwLock::new(Vec::new()),
                venue_orders: RwLock::new(Vec::new()),
                tracked: Mutex::new(Vec::new()),
                tick_gate: tokio::sync::Mutex::new(()),
                ticks_completed: AtomicU64::new(0),
                ticker: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    pub fn state(&self) -> StrategyState {
        self.inner.state()
    }

    pub fn market_id(&self) -> &str {
        &self.inner.market_id
    }

    /// Market loaded by `start`.
    pub fn market(&self) -> Option<Market> {
        self.inner.market.read().clone()
    }

    /// Positions from the latest refresh.
    pub fn positions(&self) -> Vec<Position> {
        self.inner.positions.read().clone()
    }

    /// Venue open orders from the latest refresh.
    pub fn open_orders(&self) -> Vec<Order> {
        self.inner.venue_orders.read().clone()
    }

    pub fn tracked_orders(&self) -> Vec<Order> {
        self.inner.tracked.lock().clone()
    }

    /// Ticks that ran to completion (successfully or not).
    pub fn ticks_completed(&self) -> u64 {
        self.inner.ticks_completed.load(Ordering::SeqCst)
    }

    /// True while a tick runs, and while `stop` sweeps tracked orders.
    pub fn is_tick_in_flight(&self) -> bool {
        self.inner.tick_gate.try_lock().is_err()
    }

    /// Loads the market and starts the tick schedule.
    ///
    /// The first tick fires one interval after start.
    pub async fn start(&self) -> Result<(), EngineError> {
        let _guard = self.inner.lifecycle.lock().await;

        let current = self.state();
        if current != StrategyState::Stopped {
            return Err(EngineError::AlreadyStarted(current));
        }

        let market_id = self.inner.market_id.clone();
        let venue = Arc::clone(&self.inner.venue);
        let market = self
            .inner
            .dispatcher
            .execute_once("market", || async move { venue.fetch_market(&market_id).await })
            .await
            .map_err(|e| {
                error!("[{}] Start failed: {}", self.inner.market_id, e);
                self.inner.report("start", &e.to_string(), e.is_retryable());
                EngineError::MarketFetch(e)
            })?;

        if !market.is_tradable() {
            warn!("[{}] Market is not active; orders may be rejected", market.id);
        }
        *self.inner.market.write() = Some(market);
        *self.inner.state.write() = StrategyState::Running;

        info!(
            "[{}] Strategy '{}' started (tick every {}ms)",
            self.inner.market_id,
            self.inner.strategy.lock().name(),
            self.inner.config.tick_interval.as_millis()
        );
        self.inner.events.emit(StrategyEvent::Started {
            market_id: self.inner.market_id.clone(),
            timestamp: Utc::now(),
        });

        self.spawn_ticker();
        Ok(())
    }

    /// Stops ticking and cancels every tracked order. Idempotent.
    pub async fn stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;

        {
            let mut state = self.inner.state.write();
            if *state == StrategyState::Stopped {
                return;
            }
            *state = StrategyState::Stopped;
        }

        if let Some(ticker) = self.inner.ticker.lock().take() {
            ticker.abort();
        }

        // A tick already past its state check may still be placing orders.
        let _fence = self.inner.tick_gate.lock().await;

        let orders = self.tracked_orders();
        let mut failed = 0;
        for order in &orders {
            if self.cancel_order(&order.id).await.is_err() {
                failed += 1;
            }
        }

        info!(
            "[{}] Strategy stopped ({} order(s) cancelled, {} failed)",
            self.inner.market_id,
            orders.len() - failed,
            failed
        );
        self.inner.events.emit(StrategyEvent::Stopped {
            timestamp: Utc::now(),
        });
    }

    /// Running → Paused. Returns whether the state changed.
    pub fn pause(&self) -> bool {
        if !self.inner.swap_state(StrategyState::Running, StrategyState::Paused) {
            return false;
        }
        info!("[{}] Strategy paused", self.inner.market_id);
        self.inner.events.emit(StrategyEvent::Paused {
            timestamp: Utc::now(),
        });
        true
    }

    /// Paused → Running. Returns whether the state changed.
    pub fn resume(&self) -> bool {
        if !self.inner.swap_state(StrategyState::Paused, StrategyState::Running) {
            return false;
        }
        info!("[{}] Strategy resumed", self.inner.market_id);
        self.inner.events.emit(StrategyEvent::Resumed {
            timestamp: Utc::now(),
        });
        true
    }

    /// Runs one refresh-and-decide cycle now.
    ///
    /// Returns false when skipped (not running, or a tick is in flight).
    pub async fn run_tick(&self) -> bool {
        self.inner.tick().await
    }

    /// Submits an order through the dispatcher and tracks it.
    ///
    /// Failures are reported as an Error event and yield `None`.
    pub async fn place_order(&self, intent: OrderIntent) -> Option<Order> {
        self.inner.place_order(intent).await
    }

    /// Cancels an order through the dispatcher.
    ///
    /// The order leaves the local mirror on success or `NotFound`.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError> {
        self.inner.cancel_order(order_id).await
    }

    fn spawn_ticker(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.tick_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.state() == StrategyState::Stopped {
                    return;
                }

                // Fixed-rate: a slow tick never delays the schedule.
                tokio::spawn(async move {
                    inner.tick().await;
                });
            }
        });

        if let Some(previous) = self.inner.ticker.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl EngineInner {
    fn state(&self) -> StrategyState {
        *self.state.read()
    }

    fn swap_state(&self, from: StrategyState, to: StrategyState) -> bool {
        let mut state = self.state.write();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    /// Venue-side market key used for scoping fetches and orders.
    fn scope(market: &Market) -> String {
        if market.condition_id.is_empty() {
            market.id.clone()
        } else {
            market.condition_id.clone()
        }
    }

    fn report(&self, context: &str, message: &str, retryable: bool) {
        self.events.emit(StrategyEvent::Error {
            context: context.to_string(),
            message: message.to_string(),
            retryable,
            timestamp: Utc::now(),
        });
    }

    async fn tick(self: &Arc<Self>) -> bool {
        let Ok(_gate) = self.tick_gate.try_lock() else {
            debug!("[{}] Previous tick still in flight, skipping", self.market_id);
            return false;
        };

        if self.state() != StrategyState::Running {
            trace!("[{}] Tick skipped ({})", self.market_id, self.state());
            return false;
        }

        if let Err(e) = self.refresh_and_decide().await {
            let retryable = e
                .downcast_ref::<VenueError>()
                .map_or(false, VenueError::is_retryable);
            warn!("[{}] Tick failed: {:#}", self.market_id, e);
            self.report("tick", &format!("{:#}", e), retryable);
        }

        self.ticks_completed.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn refresh_and_decide(self: &Arc<Self>) -> anyhow::Result<()> {
        let market = self
            .market
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("market not loaded"))?;
        let scope = Self::scope(&market);
        let refresh_started = Utc::now();

        let venue = &self.venue;
        let scope_ref = scope.as_str();
        let (positions, venue_orders) = tokio::try_join!(
            self.dispatcher
                .execute("positions", || venue.fetch_positions(Some(scope_ref))),
            self.dispatcher
                .execute("open orders", || venue.fetch_open_orders(Some(scope_ref))),
        )?;

        self.prune_tracked(&venue_orders, refresh_started);
        *self.positions.write() = positions.clone();
        *self.venue_orders.write() = venue_orders.clone();

        if self.state() != StrategyState::Running {
            debug!("[{}] State changed during refresh, not deciding", self.market_id);
            return Ok(());
        }

        let decisions = {
            let tracked = self.tracked.lock().clone();
            let ctx = TickContext {
                market: &market,
                positions: &positions,
                open_orders: &venue_orders,
                tracked_orders: &tracked,
                cache: &self.cache,
            };
            let mut strategy = self.strategy.lock();
            match catch_unwind(AssertUnwindSafe(|| strategy.on_tick(&ctx))) {
                Ok(result) => result?,
                Err(_) => anyhow::bail!("strategy '{}' panicked", strategy.name()),
            }
        };

        if !decisions.is_empty() {
            debug!("[{}] {} decision(s)", self.market_id, decisions.len());
        }

        for decision in decisions {
            match decision {
                Decision::Place(intent) => {
                    if self.state() != StrategyState::Running {
                        debug!(
                            "[{}] Engine {}, dropping placement of {} @ {}",
                            self.market_id,
                            self.state(),
                            intent.asset_id,
                            intent.price
                        );
                        continue;
                    }
                    self.place_order(intent).await;
                }
                Decision::Cancel { order_id } => {
                    // Already reported as an Error event.
                    if let Err(e) = self.cancel_order(&order_id).await {
                        debug!("[{}] Cancel decision for {} failed: {}", self.market_id, order_id, e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Drops tracked orders the venue no longer lists as open.
    ///
    /// Orders placed after the refresh began are kept.
    fn prune_tracked(&self, venue_orders: &[Order], refresh_started: DateTime<Utc>) {
        let mut tracked = self.tracked.lock();
        tracked.retain(|order| {
            let still_open = venue_orders.iter().any(|v| v.id == order.id && v.status.is_open());
            let keep = still_open || order.created_at > refresh_started;
            if !keep {
                debug!(
                    "[{}] Order {} no longer open at venue, untracking",
                    self.market_id, order.id
                );
            }
            keep
        });
    }

    async fn place_order(&self, intent: OrderIntent) -> Option<Order> {
        let Some(market) = self.market.read().clone() else {
            self.report("place order", "market not loaded", false);
            return None;
        };

        let request = OrderRequest {
            market_id: Self::scope(&market),
            asset_id: intent.asset_id,
            outcome: intent.outcome,
            side: intent.side,
            price: intent.price,
            size: intent.size,
        };

        let venue = &self.venue;
        let request_ref = &request;
        match self
            .dispatcher
            .execute("place order", || venue.create_order(request_ref))
            .await
        {
            Ok(order) => {
                info!(
                    "[{}] Order {} placed: {} {} {} @ {}",
                    self.market_id, order.id, order.side, order.size, order.outcome, order.price
                );
                self.tracked.lock().push(order.clone());
                self.events.emit(StrategyEvent::Order {
                    order: order.clone(),
                    timestamp: Utc::now(),
                });
                Some(order)
            }
            Err(e) => {
                error!(
                    "[{}] Order {} {} @ {} failed: {}",
                    self.market_id, request.side, request.size, request.price, e
                );
                self.report("place order", &e.to_string(), e.is_retryable());
                None
            }
        }
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError> {
        let scope = self.market.read().as_ref().map(Self::scope);

        let venue = &self.venue;
        let scope_ref = scope.as_deref();
        let result = self
            .dispatcher
            .execute("cancel order", || venue.cancel_order(order_id, scope_ref))
            .await;

        match &result {
            Ok(()) => {
                self.untrack(order_id);
                info!("[{}] Order {} cancelled", self.market_id, order_id);
                self.events.emit(StrategyEvent::Cancelled {
                    order_id: order_id.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Err(e @ VenueError::NotFound(_)) => {
                self.untrack(order_id);
                warn!("[{}] Order {} already gone: {}", self.market_id, order_id, e);
                self.report("cancel order", &e.to_string(), false);
            }
            Err(e) => {
                error!("[{}] Cancel of {} failed: {}", self.market_id, order_id, e);
                self.report("cancel order", &e.to_string(), e.is_retryable());
            }
        }

        result
    }

    fn untrack(&self, order_id: &str) {
        self.tracked.lock().retain(|o| o.id != order_id);
    }
}

impl std::fmt::Debug for StrategyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyEngine")
            .field("market_id", &self.inner.market_id)
            .field("venue", &self.inner.venue.name())
            .field("state", &self.state())
            .field("tracked_orders", &self.inner.tracked.lock().len())
            .field("ticks_completed", &self.ticks_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchConfig, RetryPolicy};
    use crate::events::{event_channel, Side};
    use crate::venue::mock::MockVenue;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Replays scripted tick results, then returns no decisions.
    struct ScriptedStrategy {
        calls: Arc<AtomicUsize>,
        script: VecDeque<anyhow::Result<Vec<Decision>>>,
    }

    impl Strategy for ScriptedStrategy {
        fn name(&self) -> &str {
            "scripted"
        }

        fn on_tick(&mut self, _ctx: &TickContext<'_>) -> anyhow::Result<Vec<Decision>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct Harness {
        engine: StrategyEngine,
        venue: Arc<MockVenue>,
        calls: Arc<AtomicUsize>,
        events: mpsc::Receiver<StrategyEvent>,
    }

    fn harness(
        tick_interval: Duration,
        script: Vec<anyhow::Result<Vec<Decision>>>,
    ) -> Harness {
        let venue = Arc::new(MockVenue::with_market("m1"));
        let calls = Arc::new(AtomicUsize::new(0));
        let (sink, events) = event_channel(256);

        let dispatcher = Arc::new(RequestDispatcher::new(DispatchConfig {
            requests_per_second: 100,
            retry: RetryPolicy {
                max_jitter: Duration::ZERO,
                ..RetryPolicy::default()
            },
            request_timeout: Duration::from_secs(30),
        }));

        let engine = StrategyEngine::new(
            EngineConfig { tick_interval },
            "m1",
            venue.clone(),
            dispatcher,
            Arc::new(OrderbookCache::new()),
            Box::new(ScriptedStrategy {
                calls: calls.clone(),
                script: script.into(),
            }),
            sink,
        );

        Harness {
            engine,
            venue,
            calls,
            events,
        }
    }

    fn intent(price: f64) -> OrderIntent {
        OrderIntent {
            asset_id: "yes-token".into(),
            outcome: "Yes".into(),
            side: Side::Buy,
            price,
            size: 5.0,
        }
    }

    fn drain(events: &mut mpsc::Receiver<StrategyEvent>) -> Vec<StrategyEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn kinds(events: &[StrategyEvent]) -> Vec<&'static str> {
        events.iter().map(StrategyEvent::kind).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_ticks_once_per_interval_until_stopped() {
        let mut h = harness(Duration::from_millis(1000), Vec::new());

        h.engine.start().await.unwrap();
        assert_eq!(h.engine.state(), StrategyState::Running);
        assert_eq!(h.engine.market().unwrap().id, "m1");

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(h.engine.ticks_completed(), 3);
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.venue.count("fetch_positions"), 3);
        assert_eq!(h.venue.count("fetch_open_orders"), 3);

        h.engine.stop().await;
        assert_eq!(h.engine.state(), StrategyState::Stopped);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(h.engine.ticks_completed(), 3);

        assert_eq!(kinds(&drain(&mut h.events)), vec!["started", "stopped"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_is_fatal_and_not_retried() {
        let mut h = harness(Duration::from_millis(1000), Vec::new());
        h.venue
            .market_failures
            .lock()
            .push_back(VenueError::Network("reset".into()));

        let result = h.engine.start().await;
        assert!(matches!(
            result,
            Err(EngineError::MarketFetch(VenueError::Network(_)))
        ));
        assert_eq!(h.engine.state(), StrategyState::Stopped);
        assert_eq!(h.venue.count("fetch_market"), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.engine.ticks_completed(), 0);
        assert_eq!(kinds(&drain(&mut h.events)), vec!["error"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let h = harness(Duration::from_millis(1000), Vec::new());
        h.engine.start().await.unwrap();
        assert!(matches!(
            h.engine.start().await,
            Err(EngineError::AlreadyStarted(StrategyState::Running))
        ));
        h.engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_short_circuits_ticks() {
        let mut h = harness(Duration::from_millis(1000), Vec::new());
        h.engine.start().await.unwrap();

        assert!(h.engine.pause());
        assert!(!h.engine.pause());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.engine.ticks_completed(), 0);

        assert!(h.engine.resume());
        assert!(!h.engine.resume());
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(h.engine.ticks_completed(), 1);

        h.engine.stop().await;
        assert_eq!(
            kinds(&drain(&mut h.events)),
            vec!["started", "paused", "resumed", "stopped"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_are_noops_when_stopped() {
        let h = harness(Duration::from_millis(1000), Vec::new());
        assert!(!h.engine.pause());
        assert!(!h.engine.resume());
        assert!(!h.engine.run_tick().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_errors_are_reported_and_schedule_continues() {
        let mut h = harness(
            Duration::from_millis(1000),
            vec![Err(anyhow::anyhow!("bad model"))],
        );
        h.venue
            .refresh_failures
            .lock()
            .push_back(VenueError::Authentication("expired key".into()));

        h.engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        // Tick 1 fails on refresh, tick 2 in the strategy, tick 3 is clean.
        assert_eq!(h.engine.ticks_completed(), 3);
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);

        let errors: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                StrategyEvent::Error {
                    context,
                    message,
                    retryable,
                    ..
                } => Some((context, message, retryable)),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].0, "tick");
        assert!(errors[0].1.contains("expired key"));
        assert!(!errors[0].2);
        assert!(errors[1].1.contains("bad model"));

        h.engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_refresh_failure_is_retried_within_tick() {
        let h = harness(Duration::from_secs(60), Vec::new());
        h.venue
            .refresh_failures
            .lock()
            .push_back(VenueError::Network("reset".into()));

        h.engine.start().await.unwrap();
        assert!(h.engine.run_tick().await);

        assert_eq!(h.venue.count("fetch_positions"), 2);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        h.engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_decisions_place_and_cancel_orders() {
        let mut h = harness(
            Duration::from_secs(60),
            vec![
                Ok(vec![Decision::Place(intent(0.45)), Decision::Place(intent(0.44))]),
                Ok(vec![Decision::Cancel {
                    order_id: "order-1".into(),
                }]),
            ],
        );
        h.engine.start().await.unwrap();

        assert!(h.engine.run_tick().await);
        let tracked = h.engine.tracked_orders();
        assert_eq!(tracked.len(), 2);
        assert_eq!(tracked[0].market_id, "0xm1");

        assert!(h.engine.run_tick().await);
        let tracked = h.engine.tracked_orders();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].id, "order-2");

        let events = drain(&mut h.events);
        assert_eq!(kinds(&events), vec!["started", "order", "order", "cancelled"]);

        h.engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_orders_gone_from_venue_are_untracked() {
        let h = harness(Duration::from_secs(60), Vec::new());
        h.engine.start().await.unwrap();

        let order = h.engine.place_order(intent(0.45)).await.unwrap();
        assert_eq!(h.engine.tracked_orders().len(), 1);

        // Simulate a fill: the venue stops listing the order.
        h.venue.open_orders.lock().retain(|o| o.id != order.id);

        assert!(h.engine.run_tick().await);
        assert!(h.engine.tracked_orders().is_empty());
        assert!(h.engine.open_orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_order_failure_returns_none() {
        let mut h = harness(Duration::from_secs(60), Vec::new());
        h.engine.start().await.unwrap();
        h.venue
            .create_failures
            .lock()
            .push_back(VenueError::InvalidOrder("tick size".into()));

        assert!(h.engine.place_order(intent(0.455)).await.is_none());
        assert!(h.engine.tracked_orders().is_empty());
        assert_eq!(h.venue.count("create_order"), 1);

        let events = drain(&mut h.events);
        match events.last() {
            Some(StrategyEvent::Error {
                context, retryable, ..
            }) => {
                assert_eq!(context, "place order");
                assert!(!retryable);
            }
            other => panic!("expected an error event, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_not_found_drops_tracked_order() {
        let h = harness(Duration::from_secs(60), Vec::new());
        h.engine.start().await.unwrap();

        let order = h.engine.place_order(intent(0.45)).await.unwrap();
        h.venue.open_orders.lock().clear();

        let result = h.engine.cancel_order(&order.id).await;
        assert!(matches!(result, Err(VenueError::NotFound(_))));
        assert!(h.engine.tracked_orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_every_tracked_order_despite_failures() {
        let mut h = harness(Duration::from_secs(60), Vec::new());
        h.engine.start().await.unwrap();

        for price in [0.41, 0.42, 0.43] {
            assert!(h.engine.place_order(intent(price)).await.is_some());
        }
        h.venue.cancel_failures.lock().insert(
            "order-2".into(),
            VenueError::Authentication("revoked".into()),
        );

        h.engine.stop().await;
        assert_eq!(h.venue.count("cancel_order"), 3);

        let remaining = h.engine.tracked_orders();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "order-2");

        let events = drain(&mut h.events);
        let cancelled = events
            .iter()
            .filter(|e| matches!(e, StrategyEvent::Cancelled { .. }))
            .count();
        assert_eq!(cancelled, 2);
        assert_eq!(events.last().map(StrategyEvent::kind), Some("stopped"));

        // Second stop is a no-op.
        h.engine.stop().await;
        assert_eq!(h.venue.count("cancel_order"), 3);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_tick_is_skipped() {
        let h = harness(Duration::from_secs(60), Vec::new());
        *h.venue.refresh_delay.lock() = Some(Duration::from_secs(5));
        h.engine.start().await.unwrap();

        let (first, second) = tokio::join!(h.engine.run_tick(), async {
            tokio::task::yield_now().await;
            assert!(h.engine.is_tick_in_flight());
            h.engine.run_tick().await
        });

        assert!(first);
        assert!(!second);
        assert_eq!(h.engine.ticks_completed(), 1);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert!(!h.engine.is_tick_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_tick_and_cancels_its_orders() {
        let mut h = harness(
            Duration::from_millis(1000),
            vec![Ok(vec![Decision::Place(intent(0.45)), Decision::Place(intent(0.44))])],
        );
        *h.venue.create_delay.lock() = Some(Duration::from_secs(2));
        h.engine.start().await.unwrap();

        // The first tick fires at 1s and is inside its first placement at 1.5s.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(h.engine.is_tick_in_flight());
        assert!(h.engine.tracked_orders().is_empty());

        h.engine.stop().await;
        assert_eq!(h.engine.state(), StrategyState::Stopped);
        assert!(!h.engine.is_tick_in_flight());

        // The in-flight placement landed and was swept; the second never went out.
        assert_eq!(h.venue.count("create_order"), 1);
        assert_eq!(h.venue.count("cancel_order"), 1);
        assert!(h.engine.tracked_orders().is_empty());
        assert!(h.venue.open_orders.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.venue.count("create_order"), 1);
        assert!(h.venue.open_orders.lock().is_empty());
        assert_eq!(
            kinds(&drain(&mut h.events)),
            vec!["started", "order", "cancelled", "stopped"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cancel_decision_does_not_end_tick() {
        let mut h = harness(
            Duration::from_secs(60),
            vec![Ok(vec![
                Decision::Cancel {
                    order_id: "missing".into(),
                },
                Decision::Place(intent(0.45)),
            ])],
        );
        h.engine.start().await.unwrap();

        assert!(h.engine.run_tick().await);
        assert_eq!(h.venue.count("cancel_order"), 1);
        assert_eq!(h.engine.tracked_orders().len(), 1);
        assert_eq!(
            kinds(&drain(&mut h.events)),
            vec!["started", "error", "order"]
        );
        h.engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_strategy_is_contained() {
        struct Panicky;
        impl Strategy for Panicky {
            fn name(&self) -> &str {
                "panicky"
            }
            fn on_tick(&mut self, _ctx: &TickContext<'_>) -> anyhow::Result<Vec<Decision>> {
                panic!("divide by zero")
            }
        }

        let venue = Arc::new(MockVenue::with_market("m1"));
        let (sink, mut events) = event_channel(16);
        let engine = StrategyEngine::new(
            EngineConfig::default(),
            "m1",
            venue,
            Arc::new(RequestDispatcher::default()),
            Arc::new(OrderbookCache::new()),
            Box::new(Panicky),
            sink,
        );

        engine.start().await.unwrap();
        assert!(engine.run_tick().await);
        assert!(engine.run_tick().await);
        assert_eq!(engine.state(), StrategyState::Running);

        let errors = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, StrategyEvent::Error { message, .. } if message.contains("panicked")))
            .count();
        assert_eq!(errors, 2);
    }
}

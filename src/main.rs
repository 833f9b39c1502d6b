//! market-sync - Main Entry Point
//!
//! Streams the books of one Polymarket market into the cache and runs the
//! bundled SpreadQuoter against it until Ctrl+C.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use market_sync::connectors::{
    ApiCredentials, Endpoints, PolymarketApiClient, PolymarketStreamProtocol, StreamingClient,
};
use market_sync::dispatch::RequestDispatcher;
use market_sync::events::{event_channel, StrategyEvent, StreamEvent};
use market_sync::orderbook::OrderbookCache;
use market_sync::strategy::{SpreadQuoter, StrategyEngine};
use market_sync::utils::init_telemetry;
use market_sync::venue::VenueAdapter;
use market_sync::watchers::OrderBookWatcher;
use market_sync::SyncConfig;

/// Wait for the first books before the engine starts deciding.
const BOOK_WARMUP: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file found or error loading it: {}", e);
    }

    if let Err(e) = init_telemetry() {
        eprintln!("Telemetry already initialized: {}", e);
    }

    info!("market-sync starting");

    let config = SyncConfig::from_env()?;
    let market_id = config
        .market_id
        .clone()
        .ok_or_else(|| anyhow::anyhow!("SYNC_MARKET_ID is not set"))?;

    let credentials = ApiCredentials::from_env();
    if credentials.is_none() {
        warn!("No API credentials found in environment");
        warn!("Set POLYMARKET_ADDRESS, POLYMARKET_API_KEY, POLYMARKET_API_SECRET and POLYMARKET_API_PASSPHRASE for positions and orders");
        warn!("Continuing with market data only");
    } else {
        info!("API credentials loaded successfully");
    }

    if config.quoter.quote_size.is_some() {
        warn!("SYNC_QUOTE_SIZE is set but no order signer is configured");
        warn!("Order placement will be rejected by the adapter until one is injected");
    }

    let cache = Arc::new(OrderbookCache::new());
    let dispatcher = Arc::new(RequestDispatcher::new(config.dispatch.clone()));
    let has_credentials = credentials.is_some();
    let venue: Arc<dyn VenueAdapter> = Arc::new(PolymarketApiClient::with_endpoints(
        credentials,
        Endpoints::from_env(),
    )?);

    let (stream_events, stream_rx) = event_channel(config.event_capacity);
    let stream = StreamingClient::new(
        config.stream.clone(),
        Arc::new(PolymarketStreamProtocol::new()),
        Arc::clone(&dispatcher),
        stream_events,
    );
    let stream_log = tokio::spawn(log_stream_events(stream_rx));

    let (engine_events, engine_rx) = event_channel(config.event_capacity);
    let engine = StrategyEngine::new(
        config.engine.clone(),
        market_id.clone(),
        Arc::clone(&venue),
        Arc::clone(&dispatcher),
        Arc::clone(&cache),
        Box::new(SpreadQuoter::new(config.quoter.clone())),
        engine_events,
    );
    let engine_log = tokio::spawn(log_strategy_events(engine_rx));

    // Positions and orders need credentials; without them only books are kept.
    let market = if has_credentials {
        engine.start().await?;
        engine
            .market()
            .ok_or_else(|| anyhow::anyhow!("engine started without a market"))?
    } else {
        let id = market_id.clone();
        let venue = Arc::clone(&venue);
        dispatcher
            .execute_once("market", || async move { venue.fetch_market(&id).await })
            .await?
    };

    let mut watcher = OrderBookWatcher::new(stream.clone(), Arc::clone(&cache));
    watcher.watch_market(&market).await?;

    if watcher.wait_until_ready(BOOK_WARMUP).await {
        info!("[{}] Books ready for {} token(s)", market.id, watcher.tokens().len());
    } else {
        warn!("[{}] Not every book arrived within {}s", market.id, BOOK_WARMUP.as_secs());
    }

    let summary = tokio::spawn(log_book_summary(
        Arc::clone(&cache),
        market.token_ids(),
        config.engine.tick_interval * 10,
    ));

    info!("Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    summary.abort();
    engine.stop().await;
    watcher.unwatch_all().await;
    stream.disconnect().await;

    // Dropping the last senders ends the log tasks.
    drop(engine);
    drop(stream);
    drop(watcher);
    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        let _ = stream_log.await;
        let _ = engine_log.await;
    })
    .await;

    info!("Shut down cleanly");
    Ok(())
}

async fn log_stream_events(mut rx: mpsc::Receiver<StreamEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::StateChanged { from, to, .. } => info!("[stream] {} -> {}", from, to),
            StreamEvent::Error { message, .. } => warn!("[stream] {}", message),
            StreamEvent::CallbackFailed { key, message, .. } => {
                warn!("[stream] Callback for {} failed: {}", key, message)
            }
            StreamEvent::PermanentlyDisconnected { attempts, .. } => {
                error!("[stream] Gave up after {} reconnection attempts", attempts)
            }
        }
    }
}

async fn log_strategy_events(mut rx: mpsc::Receiver<StrategyEvent>) {
    while let Some(event) = rx.recv().await {
        match &event {
            StrategyEvent::Error {
                context,
                message,
                retryable,
                ..
            } => warn!(
                "[engine] {} failed ({}): {}",
                context,
                if *retryable { "transient" } else { "fatal" },
                message
            ),
            StrategyEvent::Order { order, .. } => info!(
                "[engine] Order {} {} {} @ {}",
                order.id, order.side, order.size, order.price
            ),
            other => debug!("[engine] {}", other.kind()),
        }
    }
}

async fn log_book_summary(cache: Arc<OrderbookCache>, tokens: Vec<String>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        for token in &tokens {
            match (cache.mid_price(token), cache.spread(token)) {
                (Some(mid), Some(spread)) => {
                    info!("[{}] mid {:.4} spread {:.4}", token, mid, spread)
                }
                _ => debug!("[{}] no two-sided book", token),
            }
        }
    }
}

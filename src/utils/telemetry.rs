//! Telemetry and structured logging setup.
//!
//! Log lines carry a `[key]` prefix (market, asset or protocol name) for
//! filtering. Verbosity comes from `RUST_LOG`.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Filter used when `RUST_LOG` is unset: INFO everywhere, DEBUG for this crate.
pub const DEFAULT_LOG_FILTER: &str = "info,market_sync=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Initializes compact human-readable logging.
///
/// Example RUST_LOG values:
/// - `info` - All info and above
/// - `market_sync=trace,tokio_tungstenite=warn` - Frame-level tracing for us
///
/// Returns an error if a global subscriber is already installed.
pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()?;
    Ok(())
}

/// Initializes telemetry with JSON output (for production).
pub fn init_telemetry_json() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_span_events(FmtSpan::CLOSE))
        .try_init()?;
    Ok(())
}

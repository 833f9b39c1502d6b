//! Process configuration.
//!
//! Every component has its own config struct with defaults; [`SyncConfig`]
//! aggregates them and overlays `SYNC_*` environment variables.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::connectors::StreamConfig;
use crate::dispatch::DispatchConfig;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::strategy::{EngineConfig, SpreadQuoterConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Complete configuration for one market-sync process.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Market to trade (`SYNC_MARKET_ID`).
    pub market_id: Option<String>,
    pub stream: StreamConfig,
    pub dispatch: DispatchConfig,
    pub engine: EngineConfig,
    pub quoter: SpreadQuoterConfig,
    /// Capacity of each event channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            market_id: None,
            stream: StreamConfig::default(),
            dispatch: DispatchConfig::default(),
            engine: EngineConfig::default(),
            quoter: SpreadQuoterConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Defaults overlaid with `SYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Overlay { lookup };
        let mut config = Self::default();

        config.market_id = env.string("SYNC_MARKET_ID");

        let stream = &mut config.stream;
        if let Some(url) = env.string("SYNC_WS_URL") {
            stream.url = url;
        }
        env.set(&mut stream.auto_reconnect, "SYNC_AUTO_RECONNECT")?;
        env.set(&mut stream.max_reconnect_attempts, "SYNC_MAX_RECONNECT_ATTEMPTS")?;
        env.set_millis(&mut stream.reconnect_base_delay, "SYNC_RECONNECT_BASE_DELAY_MS")?;
        env.set(&mut stream.reconnect_growth, "SYNC_RECONNECT_GROWTH")?;
        env.set_millis(&mut stream.reconnect_max_delay, "SYNC_RECONNECT_MAX_DELAY_MS")?;
        env.set_millis(&mut stream.heartbeat_interval, "SYNC_HEARTBEAT_INTERVAL_MS")?;
        env.set_millis(&mut stream.connect_timeout, "SYNC_CONNECT_TIMEOUT_MS")?;

        let dispatch = &mut config.dispatch;
        env.set(&mut dispatch.requests_per_second, "SYNC_REQUESTS_PER_SECOND")?;
        env.set(&mut dispatch.retry.max_retries, "SYNC_MAX_RETRIES")?;
        env.set_millis(&mut dispatch.retry.base_delay, "SYNC_RETRY_BASE_DELAY_MS")?;
        env.set(&mut dispatch.retry.multiplier, "SYNC_RETRY_MULTIPLIER")?;
        env.set_millis(&mut dispatch.retry.max_jitter, "SYNC_RETRY_MAX_JITTER_MS")?;
        env.set_millis(&mut dispatch.request_timeout, "SYNC_REQUEST_TIMEOUT_MS")?;

        env.set_millis(&mut config.engine.tick_interval, "SYNC_TICK_INTERVAL_MS")?;

        if let Some(size) = env.parse::<f64>("SYNC_QUOTE_SIZE")? {
            config.quoter.quote_size = Some(size);
        }
        env.set(&mut config.quoter.min_spread, "SYNC_MIN_SPREAD")?;
        env.set(&mut config.quoter.max_position, "SYNC_MAX_POSITION")?;

        env.set(&mut config.event_capacity, "SYNC_EVENT_CAPACITY")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool, String); 6] = [
            (
                "SYNC_TICK_INTERVAL_MS",
                !self.engine.tick_interval.is_zero(),
                self.engine.tick_interval.as_millis().to_string(),
            ),
            (
                "SYNC_HEARTBEAT_INTERVAL_MS",
                !self.stream.heartbeat_interval.is_zero(),
                self.stream.heartbeat_interval.as_millis().to_string(),
            ),
            (
                "SYNC_REQUESTS_PER_SECOND",
                self.dispatch.requests_per_second > 0,
                self.dispatch.requests_per_second.to_string(),
            ),
            (
                "SYNC_RECONNECT_GROWTH",
                self.stream.reconnect_growth >= 1.0,
                self.stream.reconnect_growth.to_string(),
            ),
            (
                "SYNC_RETRY_MULTIPLIER",
                self.dispatch.retry.multiplier >= 1.0,
                self.dispatch.retry.multiplier.to_string(),
            ),
            (
                "SYNC_EVENT_CAPACITY",
                self.event_capacity > 0,
                self.event_capacity.to_string(),
            ),
        ];

        for (key, ok, value) in checks {
            if !ok {
                return Err(ConfigError::Invalid {
                    key,
                    value,
                    reason: "out of range".to_string(),
                });
            }
        }
        Ok(())
    }
}

struct Overlay<F> {
    lookup: F,
}

impl<F> Overlay<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(None),
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                }),
        }
    }

    fn set<T>(&self, target: &mut T, key: &'static str) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.parse(key)? {
            *target = value;
        }
        Ok(())
    }

    fn set_millis(&self, target: &mut Duration, key: &'static str) -> Result<(), ConfigError> {
        if let Some(ms) = self.parse::<u64>(key)? {
            *target = Duration::from_millis(ms);
        }
        Ok(())
    }
}

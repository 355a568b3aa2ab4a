//! Configuration parsing for the xfeed engine.
//!
//! The engine reads a single JSON file. Field names are snake_case; the
//! camelCase spellings used by older deployments (`tradingType`,
//! `maxAttempts`, `baseDelay`, ...) are accepted as aliases.
//!
//! # Example config
//!
//! ```json
//! {
//!   "logging": { "module_name": "xfeed", "log_path": "/tmp/log" },
//!   "exchanges": ["binance", "bybit", "okx"],
//!   "trading_type": "futures",
//!   "symbols": ["BTC/USDT", "ETH/USDT"],
//!   "data_types": ["ticker", "depth", "trade", "funding"],
//!   "reconnect": { "enabled": true, "max_attempts": 10, "base_delay_ms": 1000, "max_delay_ms": 30000 },
//!   "heartbeat": { "enabled": true, "interval_sec": 20 }
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::FeedError;
use crate::types::{DataType, Exchange, MarketType};

/// Top-level engine config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Module metadata (name, log path).
    #[serde(default)]
    pub logging: Option<LoggingConfig>,

    /// Exchanges to connect to. Each gets its own connection task.
    pub exchanges: Vec<Exchange>,

    /// Spot or futures; selects endpoints and native symbol spelling.
    #[serde(default, alias = "tradingType")]
    pub trading_type: MarketType,

    /// Canonical symbols subscribed at start-up by the runner.
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Data types subscribed for every symbol at start-up by the runner.
    #[serde(default, alias = "dataTypes")]
    pub data_types: Vec<DataType>,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default, alias = "clockSync")]
    pub clock_sync: ClockSyncConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-exchange WebSocket URL overrides (gateways, test servers).
    #[serde(default)]
    pub endpoints: HashMap<Exchange, String>,

    /// Transport connect timeout in milliseconds (default: 10_000).
    #[serde(default, alias = "connectTimeout")]
    pub connect_timeout_ms: Option<u64>,

    /// Per-task grace period during `stop()` in milliseconds (default: 5_000).
    #[serde(default, alias = "shutdownTimeout")]
    pub shutdown_timeout_ms: Option<u64>,
}

/// Logging metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    pub level: Option<String>,
}

/// Reconnect policy shared by all exchanges.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Retries before giving up; `0` retries forever.
    #[serde(default = "default_max_attempts", alias = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms", alias = "baseDelay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms", alias = "maxDelay")]
    pub max_delay_ms: u64,
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Keep-alive policy. Silence for two intervals forces a reconnect.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_sec", alias = "interval")]
    pub interval_sec: u64,
    /// Exchanges with neither pings nor the silence watchdog.
    #[serde(default)]
    pub disabled_for: Vec<Exchange>,
}

impl HeartbeatConfig {
    /// Heartbeat interval for `exchange`, or `None` if pinging is off.
    pub fn interval_for(&self, exchange: Exchange) -> Option<Duration> {
        if !self.enabled || self.interval_sec == 0 || self.disabled_for.contains(&exchange) {
            return None;
        }
        Some(Duration::from_secs(self.interval_sec))
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { enabled: true, interval_sec: default_heartbeat_sec(), disabled_for: Vec::new() }
    }
}

/// Server-time probing used to refresh clock offsets.
#[derive(Debug, Clone, Deserialize)]
pub struct ClockSyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_clock_sync_sec", alias = "interval")]
    pub interval_sec: u64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self { enabled: true, interval_sec: default_clock_sync_sec() }
    }
}

/// Capacity bounds for the last-value cache and trade history.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum keys per last-value cache; the oldest key is evicted.
    #[serde(default = "default_max_entries", alias = "maxEntries")]
    pub max_entries: usize,
    /// Trades retained per `(exchange, symbol)`; the oldest trade is evicted.
    #[serde(default = "default_trade_history", alias = "tradeHistory")]
    pub trade_history: usize,
    /// Capacity of the in-process record broadcast channel.
    #[serde(default = "default_broadcast_capacity", alias = "broadcastCapacity")]
    pub broadcast_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            trade_history: default_trade_history(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    10
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_heartbeat_sec() -> u64 {
    20
}
fn default_clock_sync_sec() -> u64 {
    60
}
fn default_max_entries() -> usize {
    4_096
}
fn default_trade_history() -> usize {
    500
}
fn default_broadcast_capacity() -> usize {
    4_096
}

impl EngineConfig {
    /// Minimal config for the given exchanges with every other field defaulted.
    pub fn new(exchanges: Vec<Exchange>, trading_type: MarketType) -> Self {
        Self {
            logging: None,
            exchanges,
            trading_type,
            symbols: Vec::new(),
            data_types: Vec::new(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            clock_sync: ClockSyncConfig::default(),
            cache: CacheConfig::default(),
            endpoints: HashMap::new(),
            connect_timeout_ms: None,
            shutdown_timeout_ms: None,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.unwrap_or(10_000))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms.unwrap_or(5_000))
    }

    /// Returns the module name used for log file prefixes.
    pub fn module_name(&self) -> String {
        self.logging.as_ref().and_then(|l| l.module_name.clone()).unwrap_or_else(|| "xfeed".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.logging.as_ref().and_then(|l| l.log_path.clone())
    }

    /// Reject configs the engine cannot run with.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.exchanges.is_empty() {
            return Err(FeedError::Config("at least one exchange is required".into()));
        }
        let mut seen = Vec::with_capacity(self.exchanges.len());
        for ex in &self.exchanges {
            if seen.contains(ex) {
                return Err(FeedError::Config(format!("exchange listed twice: {ex}")));
            }
            seen.push(*ex);
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(FeedError::Config("reconnect.base_delay_ms must be > 0".into()));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(FeedError::Config("reconnect.max_delay_ms must be >= base_delay_ms".into()));
        }
        if self.cache.max_entries == 0 || self.cache.trade_history == 0 {
            return Err(FeedError::Config("cache capacities must be > 0".into()));
        }
        Ok(())
    }
}

/// Load, parse and validate a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

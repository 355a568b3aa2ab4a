//! [`FeedEngine`], the public facade over normalizers, connections, caches
//! and the publisher.
//!
//! ```text
//! FeedEngine::new(config)
//!   ├─ subscribe(exchange, symbol, data_type)   registry + live command
//!   ├─ start()   one connection task per exchange (+ clock sync tasks)
//!   ├─ get_ticker / get_depth / ... / get_stats  read-only views
//!   └─ stop()    shutdown signal, bounded join, abort stragglers
//! ```

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use xfeed_core::clock::ClockSync;
use xfeed_core::config::EngineConfig;
use xfeed_core::error::FeedError;
use xfeed_core::types::*;

use crate::cache::MarketCache;
use crate::clock_source::{self, HttpServerClock, ServerClock};
use crate::connection::{
    self, Command, ConnectionEvent, ConnectionSettings, ConnectionStatus, SessionContext,
};
use crate::normalizer::NormalizerRegistry;
use crate::publish::{MarketSink, MemorySink, Publisher};
use crate::registry;
use crate::stats::EngineStats;
use crate::subscription::{self, SubscriptionRegistry};

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

pub struct FeedEngine {
    config: EngineConfig,
    ctx: Arc<SessionContext>,
    clock: Arc<ClockSync>,
    server_clock: Option<Arc<dyn ServerClock>>,
    commands: Mutex<AHashMap<Exchange, mpsc::UnboundedSender<Command>>>,
    running: Mutex<Option<Running>>,
}

impl FeedEngine {
    /// Build an engine publishing into an in-memory sink sized by `cache`.
    pub fn new(config: EngineConfig) -> Result<Self, FeedError> {
        let sink = MemorySink::new(config.cache.max_entries, config.cache.trade_history);
        Self::with_sink(config, Arc::new(sink))
    }

    pub fn with_sink(config: EngineConfig, sink: Arc<dyn MarketSink>) -> Result<Self, FeedError> {
        config.validate()?;
        let exchanges = config.exchanges.clone();
        let market = config.trading_type;
        let clock = Arc::new(ClockSync::new(&exchanges));

        let ctx = SessionContext::new(
            &exchanges,
            NormalizerRegistry::new(&exchanges, market, clock.clone()),
            SubscriptionRegistry::new(&exchanges, market),
            MarketCache::new(&config.cache),
            Publisher::new(sink, config.cache.broadcast_capacity),
        );

        Ok(Self {
            config,
            ctx: Arc::new(ctx),
            clock,
            server_clock: None,
            commands: Mutex::new(AHashMap::new()),
            running: Mutex::new(None),
        })
    }

    /// Replace the HTTP server-time source (tests, private gateways).
    pub fn with_server_clock(mut self, source: Arc<dyn ServerClock>) -> Self {
        self.server_clock = Some(source);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn one connection task per configured exchange.
    pub async fn start(&self) -> Result<(), FeedError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(FeedError::Engine("engine already running".into()));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();
        let mut commands = self.commands.lock();
        commands.clear();

        for &ex in &self.config.exchanges {
            let (tx, rx) = mpsc::unbounded_channel();
            commands.insert(ex, tx);
            let settings = self.settings_for(ex);
            let ctx = self.ctx.clone();
            let handle = tokio::spawn(connection::run_connection(settings, ctx, rx, shutdown_rx.clone()));
            tasks.push((format!("{ex}-ws"), handle));
        }
        drop(commands);

        if self.config.clock_sync.enabled {
            match self.clock_source() {
                Ok(source) => {
                    let interval = std::time::Duration::from_secs(self.config.clock_sync.interval_sec.max(1));
                    for &ex in &self.config.exchanges {
                        let handle = clock_source::spawn_sync_task(
                            source.clone(),
                            self.clock.clone(),
                            ex,
                            interval,
                            shutdown_rx.clone(),
                        );
                        tasks.push((format!("{ex}-clock"), handle));
                    }
                }
                Err(e) => warn!("[engine] clock sync disabled: {e}"),
            }
        }

        self.ctx.stats.mark_started();
        info!("[engine] started {} exchange(s), market {}", self.config.exchanges.len(), self.config.trading_type);
        *running = Some(Running { shutdown: shutdown_tx, tasks });
        Ok(())
    }

    /// Signal every task to stop and wait up to `shutdown_timeout` for each.
    /// Calling it again, or before `start`, is a no-op.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        self.commands.lock().clear();
        let _ = running.shutdown.send(true);

        let timeout = self.config.shutdown_timeout();
        for (name, mut handle) in running.tasks {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!("[engine] {name} did not stop within {timeout:?}, aborting");
                handle.abort();
            }
        }
        self.ctx.stats.mark_stopped();
        info!("[engine] stopped");
    }

    /// Add a desired subscription; forwarded to the live connection if any.
    ///
    /// Returns `Ok(false)` if the pair was already subscribed.
    pub fn subscribe(&self, exchange: Exchange, symbol: &str, data_type: DataType) -> Result<bool, FeedError> {
        let added = self.ctx.subscriptions.subscribe(exchange, symbol, data_type)?;
        if added {
            self.send_command(exchange, Command::Subscribe(subscription::canonicalize(exchange, symbol), data_type));
        }
        Ok(added)
    }

    pub fn unsubscribe(&self, exchange: Exchange, symbol: &str, data_type: DataType) -> bool {
        let removed = self.ctx.subscriptions.unsubscribe(exchange, symbol, data_type);
        if removed {
            self.send_command(exchange, Command::Unsubscribe(subscription::canonicalize(exchange, symbol), data_type));
        }
        removed
    }

    /// Latest ticker for `symbol` from `exchange`, or from whichever venue
    /// reported last.
    pub fn get_ticker(&self, symbol: &str, exchange: Option<Exchange>) -> Option<Ticker> {
        self.ctx.cache.ticker(&lookup_symbol(symbol, exchange), exchange)
    }

    pub fn get_depth(&self, symbol: &str, exchange: Option<Exchange>) -> Option<Depth> {
        self.ctx.cache.depth(&lookup_symbol(symbol, exchange), exchange)
    }

    pub fn get_funding_rate(&self, symbol: &str, exchange: Option<Exchange>) -> Option<FundingRate> {
        self.ctx.cache.funding_rate(&lookup_symbol(symbol, exchange), exchange)
    }

    pub fn get_kline(&self, symbol: &str, exchange: Option<Exchange>) -> Option<Kline> {
        self.ctx.cache.kline(&lookup_symbol(symbol, exchange), exchange)
    }

    pub fn recent_trades(&self, exchange: Exchange, symbol: &str, limit: usize) -> Vec<Trade> {
        self.ctx.cache.recent_trades(exchange, &lookup_symbol(symbol, Some(exchange)), limit)
    }

    pub fn get_connection_status(&self, exchange: Exchange) -> Option<ConnectionStatus> {
        self.ctx.status(exchange)
    }

    pub fn connection_statuses(&self) -> Vec<ConnectionStatus> {
        self.ctx.statuses()
    }

    pub fn get_stats(&self) -> EngineStats {
        self.ctx.stats.snapshot(self.ctx.subscriptions.counts())
    }

    /// Endpoint a connection to `exchange` would use, `None` if unconfigured.
    pub fn ws_url(&self, exchange: Exchange) -> Option<String> {
        if !self.config.exchanges.contains(&exchange) {
            return None;
        }
        Some(
            self.config
                .endpoints
                .get(&exchange)
                .cloned()
                .unwrap_or_else(|| registry::ws_url(exchange, self.config.trading_type).to_string()),
        )
    }

    pub fn subscriptions(&self, exchange: Exchange) -> Vec<(String, DataType)> {
        self.ctx.subscriptions.pairs(exchange)
    }

    /// Connection status changes and errors.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.ctx.events()
    }

    /// Every normalized record, as published.
    pub fn feed(&self) -> broadcast::Receiver<MarketRecord> {
        self.ctx.publisher.subscribe()
    }

    pub fn clock(&self) -> Arc<ClockSync> {
        self.clock.clone()
    }

    fn settings_for(&self, exchange: Exchange) -> ConnectionSettings {
        ConnectionSettings {
            exchange,
            market: self.config.trading_type,
            // Only called for configured exchanges.
            url: self.ws_url(exchange).unwrap_or_default(),
            connect_timeout: self.config.connect_timeout(),
            heartbeat: self.config.heartbeat.interval_for(exchange),
            ping: registry::ping_payload(exchange),
            reconnect: self.config.reconnect.clone(),
        }
    }

    fn clock_source(&self) -> anyhow::Result<Arc<dyn ServerClock>> {
        if let Some(source) = &self.server_clock {
            return Ok(source.clone());
        }
        Ok(Arc::new(HttpServerClock::new(self.config.trading_type, self.config.connect_timeout())?))
    }

    fn send_command(&self, exchange: Exchange, cmd: Command) {
        if let Some(tx) = self.commands.lock().get(&exchange) {
            // Closed channel: the task has exited and will not reconnect.
            let _ = tx.send(cmd);
        }
    }
}

fn lookup_symbol(symbol: &str, exchange: Option<Exchange>) -> String {
    match exchange {
        Some(ex) => subscription::canonicalize(ex, symbol),
        // Dashed ids (`BTC-USDT-SWAP`) are OKX-style, the rest concatenated.
        None if symbol.contains('-') => subscription::canonicalize(Exchange::Okx, symbol),
        None => subscription::canonicalize(Exchange::Binance, symbol),
    }
}

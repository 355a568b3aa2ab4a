//! Per-exchange connection lifecycle.
//!
//! Each configured exchange gets one tokio task running [`run_connection`]:
//!
//! ```text
//! Disconnected ─► Connecting ─► Subscribing ─► Connected
//!                     ▲                            │ lost
//!                     └──── Reconnecting ◄─────────┘
//!                               │ budget spent / reconnect disabled
//!                               ▼
//!                          Disconnected (failed)
//! ```
//!
//! A session replays every desired subscription before reporting
//! `connected`. Live subscription changes arrive on a command channel and are
//! applied against the per-session sent set, so a pair is never sent twice
//! in one session and never dropped across a reconnect.
//!
//! Tasks share [`SessionContext`] and nothing else; one venue failing never
//! touches another venue's status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};
use xfeed_core::config::ReconnectConfig;
use xfeed_core::time_util;
use xfeed_core::types::*;
use xfeed_core::ws::{Backoff, PingPayload, connect_ws};

use crate::cache::MarketCache;
use crate::normalizer::{NormalizerRegistry, ParsedFrame};
use crate::publish::Publisher;
use crate::stats::StatsCollector;
use crate::subscription::{SessionSubscriptions, SubscriptionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribing,
    Connected,
    Reconnecting,
}

/// Externally visible connection health for one exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub exchange: Exchange,
    pub state: ConnectionState,
    pub connected: bool,
    pub reconnecting: bool,
    /// Retry number of the pending reconnect, `0` while connected.
    pub attempt: u32,
    pub last_error: Option<String>,
    pub connected_at: Option<u64>,
    /// Retries exhausted; the task has exited.
    pub failed: bool,
}

impl ConnectionStatus {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            state: ConnectionState::Disconnected,
            connected: false,
            reconnecting: false,
            attempt: 0,
            last_error: None,
            connected_at: None,
            failed: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StatusChanged(ConnectionStatus),
    Error { exchange: Exchange, message: String },
}

/// Live subscription change for a running connection. Symbols are canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe(String, DataType),
    Unsubscribe(String, DataType),
}

/// State shared between the engine facade and every connection task.
pub struct SessionContext {
    pub normalizers: NormalizerRegistry,
    pub subscriptions: SubscriptionRegistry,
    pub cache: MarketCache,
    pub publisher: Publisher,
    pub stats: StatsCollector,
    statuses: RwLock<AHashMap<Exchange, ConnectionStatus>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl SessionContext {
    pub fn new(
        exchanges: &[Exchange],
        normalizers: NormalizerRegistry,
        subscriptions: SubscriptionRegistry,
        cache: MarketCache,
        publisher: Publisher,
    ) -> Self {
        let statuses = exchanges.iter().map(|&e| (e, ConnectionStatus::new(e))).collect();
        let (events, _) = broadcast::channel(256);
        Self {
            normalizers,
            subscriptions,
            cache,
            publisher,
            stats: StatsCollector::new(),
            statuses: RwLock::new(statuses),
            events,
        }
    }

    pub fn status(&self, exchange: Exchange) -> Option<ConnectionStatus> {
        self.statuses.read().get(&exchange).cloned()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        let mut all: Vec<_> = self.statuses.read().values().cloned().collect();
        all.sort_by_key(|s| s.exchange);
        all
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Mutate `exchange`'s status and announce the result.
    pub fn update_status(&self, exchange: Exchange, f: impl FnOnce(&mut ConnectionStatus)) {
        let snapshot = {
            let mut statuses = self.statuses.write();
            let Some(status) = statuses.get_mut(&exchange) else {
                return;
            };
            f(status);
            status.clone()
        };
        let _ = self.events.send(ConnectionEvent::StatusChanged(snapshot));
    }

    fn report_error(&self, exchange: Exchange, message: String) {
        let _ = self.events.send(ConnectionEvent::Error { exchange, message });
    }

    /// Normalize one inbound text frame, then cache and publish the records.
    pub async fn handle_text(&self, exchange: Exchange, text: &str) {
        match self.normalizers.parse_frame(exchange, text) {
            ParsedFrame::Control => trace!("[{exchange}] control frame: {text}"),
            ParsedFrame::Invalid => {
                self.stats.record_received();
                self.stats.record_error();
                debug!("[{exchange}] dropped frame: {}", preview(text));
            }
            ParsedFrame::Rejected(reason) => {
                self.stats.record_error();
                warn!("[{exchange}] request rejected: {reason}");
                self.report_error(exchange, format!("request rejected: {reason}"));
            }
            ParsedFrame::Records(records) => {
                self.stats.record_received();
                for record in &records {
                    self.cache.update(record);
                    match self.publisher.publish(record).await {
                        Ok(()) => self.stats.record_published(1),
                        Err(e) => {
                            self.stats.record_error();
                            warn!("[{exchange}] publish failed: {e}");
                        }
                    }
                }
            }
        }
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Static settings for one connection task.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub exchange: Exchange,
    pub market: MarketType,
    pub url: String,
    pub connect_timeout: Duration,
    /// `None` disables application pings and the silence watchdog.
    pub heartbeat: Option<Duration>,
    pub ping: PingPayload,
    pub reconnect: ReconnectConfig,
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Connect, subscribe, stream and reconnect until shutdown or failure.
pub async fn run_connection(
    settings: ConnectionSettings,
    ctx: Arc<SessionContext>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    let ex = settings.exchange;
    let rc = &settings.reconnect;
    let mut backoff = Backoff::new(rc.base_delay(), rc.max_delay(), rc.max_attempts);

    loop {
        if *shutdown.borrow() {
            break;
        }
        ctx.update_status(ex, |s| s.state = ConnectionState::Connecting);
        info!("[{ex}] connecting to {}", settings.url);

        let reason = match run_session(&settings, &ctx, &mut commands, &mut shutdown, &mut backoff).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Lost(reason) => reason,
        };

        ctx.report_error(ex, reason.clone());
        ctx.update_status(ex, |s| {
            s.connected = false;
            s.last_error = Some(reason.clone());
        });

        if !rc.enabled {
            warn!("[{ex}] disconnected ({reason}), reconnect disabled");
            break;
        }
        let Some(delay) = backoff.next_delay() else {
            error!("[{ex}] giving up after {} reconnect attempts: {reason}", backoff.attempt());
            ctx.update_status(ex, |s| s.failed = true);
            break;
        };

        ctx.stats.record_reconnection();
        let attempt = backoff.attempt();
        ctx.update_status(ex, |s| {
            s.state = ConnectionState::Reconnecting;
            s.reconnecting = true;
            s.attempt = attempt;
        });
        warn!("[{ex}] disconnected ({reason}), retry {attempt} in {delay:?}");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    ctx.update_status(ex, |s| {
        s.state = ConnectionState::Disconnected;
        s.connected = false;
        s.reconnecting = false;
    });
    info!("[{ex}] connection task stopped");
}

async fn run_session(
    settings: &ConnectionSettings,
    ctx: &SessionContext,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    shutdown: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> SessionEnd {
    let ex = settings.exchange;
    let no_headers = HashMap::new();

    let ws = tokio::select! {
        _ = shutdown.changed() => return SessionEnd::Shutdown,
        r = connect_ws(&settings.url, &no_headers, settings.connect_timeout) => match r {
            Ok(ws) => ws,
            Err(e) => return SessionEnd::Lost(format!("connect failed: {e}")),
        },
    };
    let (mut write, mut read) = ws.split();

    ctx.update_status(ex, |s| s.state = ConnectionState::Subscribing);

    // The registry already reflects anything queued while we were offline.
    while commands.try_recv().is_ok() {}
    // Snapshots arrive again after the replay; deltas must not land on stale books.
    ctx.normalizers.reset(ex);

    let mut session = SessionSubscriptions::new(ex, settings.market);
    let mut replayed = 0usize;
    for (symbol, dt) in ctx.subscriptions.pairs(ex) {
        match session.add(&symbol, dt) {
            Ok(Some(msg)) => {
                if let Err(e) = write.send(Message::Text(msg.into())).await {
                    return SessionEnd::Lost(format!("subscribe send failed: {e}"));
                }
                replayed += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("[{ex}] skipping {symbol} {dt}: {e}"),
        }
    }

    backoff.reset();
    ctx.update_status(ex, |s| {
        s.state = ConnectionState::Connected;
        s.connected = true;
        s.reconnecting = false;
        s.attempt = 0;
        s.failed = false;
        s.connected_at = Some(time_util::now_ms());
    });
    info!("[{ex}] connected, {replayed} subscription(s) sent");

    let mut heartbeat = settings.heartbeat.map(|d| tokio::time::interval_at(Instant::now() + d, d));
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.close().await;
                return SessionEnd::Shutdown;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        ctx.handle_text(ex, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_inbound = Instant::now();
                        match std::str::from_utf8(&data) {
                            Ok(text) => ctx.handle_text(ex, text).await,
                            Err(_) => {
                                ctx.stats.record_received();
                                ctx.stats.record_error();
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_inbound = Instant::now();
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            return SessionEnd::Lost(format!("pong send failed: {e}"));
                        }
                    }
                    Some(Ok(Message::Pong(_))) => last_inbound = Instant::now(),
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Lost(format!("closed by server: {frame:?}"));
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => return SessionEnd::Lost(format!("read error: {e}")),
                    None => return SessionEnd::Lost("stream ended".into()),
                }
            }

            Some(cmd) = commands.recv() => {
                let outcome = match &cmd {
                    Command::Subscribe(symbol, dt) => session.add(symbol, *dt),
                    Command::Unsubscribe(symbol, dt) => session.remove(symbol, *dt),
                };
                match outcome {
                    Ok(Some(msg)) => {
                        debug!("[{ex}] {cmd:?}");
                        if let Err(e) = write.send(Message::Text(msg.into())).await {
                            return SessionEnd::Lost(format!("send failed: {e}"));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("[{ex}] {cmd:?} rejected: {e}"),
                }
            }

            _ = next_tick(&mut heartbeat) => {
                let Some(period) = settings.heartbeat else { continue };
                if last_inbound.elapsed() >= period * 2 {
                    return SessionEnd::Lost(format!("no traffic for {:?}", last_inbound.elapsed()));
                }
                if let Err(e) = write.send(settings.ping.to_message()).await {
                    return SessionEnd::Lost(format!("ping send failed: {e}"));
                }
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::MemorySink;
    use serde_json::json;
    use xfeed_core::clock::ClockSync;
    use xfeed_core::config::CacheConfig;

    fn context(exchanges: &[Exchange]) -> SessionContext {
        let clock = Arc::new(ClockSync::new(exchanges));
        SessionContext::new(
            exchanges,
            NormalizerRegistry::new(exchanges, MarketType::Futures, clock),
            SubscriptionRegistry::new(exchanges, MarketType::Futures),
            MarketCache::new(&CacheConfig::default()),
            Publisher::new(Arc::new(MemorySink::default()), 64),
        )
    }

    #[tokio::test]
    async fn frames_update_cache_and_counters() {
        let ctx = context(&[Exchange::Binance]);
        let frame = json!({"e": "trade", "E": 1, "s": "BTCUSDT", "t": 7, "p": "100", "q": "2", "m": false});
        ctx.handle_text(Exchange::Binance, &frame.to_string()).await;
        ctx.handle_text(Exchange::Binance, r#"{"result":null,"id":1}"#).await;
        ctx.handle_text(Exchange::Binance, "garbage").await;

        let stats = ctx.stats.snapshot(Default::default());
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.messages_published, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(ctx.cache.recent_trades(Exchange::Binance, "BTC/USDT", 5)[0].price, 100.0);
    }

    #[tokio::test]
    async fn malformed_trade_counts_as_error() {
        let ctx = context(&[Exchange::Binance]);
        let frame = json!({"e": "trade", "E": 1, "s": "BTCUSDT", "t": 7, "p": "abc", "q": "2", "m": false});
        ctx.handle_text(Exchange::Binance, &frame.to_string()).await;

        let stats = ctx.stats.snapshot(Default::default());
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.messages_published, 0);
        assert_eq!(stats.errors, 1);
        assert!(ctx.cache.recent_trades(Exchange::Binance, "BTC/USDT", 5).is_empty());
    }

    #[tokio::test]
    async fn rejected_request_is_reported() {
        let ctx = context(&[Exchange::Okx]);
        let mut events = ctx.events();
        let reply = r#"{"event":"error","code":"60018","msg":"Wrong URL or channel:tickers,instId:FOO-USDT doesn't exist.","connId":"a4d3ae55"}"#;
        ctx.handle_text(Exchange::Okx, reply).await;

        assert_eq!(ctx.stats.snapshot(Default::default()).errors, 1);
        match events.recv().await.unwrap() {
            ConnectionEvent::Error { exchange, message } => {
                assert_eq!(exchange, Exchange::Okx);
                assert!(message.contains("60018"), "{message}");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_updates_are_isolated_and_announced() {
        let ctx = context(&[Exchange::Binance, Exchange::Okx]);
        let mut events = ctx.events();
        ctx.update_status(Exchange::Okx, |s| {
            s.state = ConnectionState::Reconnecting;
            s.reconnecting = true;
        });
        assert!(ctx.status(Exchange::Okx).unwrap().reconnecting);
        assert_eq!(ctx.status(Exchange::Binance).unwrap().state, ConnectionState::Disconnected);
        assert!(ctx.status(Exchange::Bybit).is_none());
        match events.recv().await.unwrap() {
            ConnectionEvent::StatusChanged(s) => assert_eq!(s.exchange, Exchange::Okx),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_exhausts_budget() {
        let ctx = Arc::new(context(&[Exchange::Okx]));
        let settings = ConnectionSettings {
            exchange: Exchange::Okx,
            market: MarketType::Futures,
            url: "ws://127.0.0.1:1".into(),
            connect_timeout: Duration::from_millis(200),
            heartbeat: None,
            ping: PingPayload::Text("ping".into()),
            reconnect: ReconnectConfig { enabled: true, max_attempts: 2, base_delay_ms: 10, max_delay_ms: 20 },
        };
        let (_tx, rx) = mpsc::unbounded_channel();
        let (_stop, stop_rx) = watch::channel(false);
        tokio::time::timeout(Duration::from_secs(5), run_connection(settings, ctx.clone(), rx, stop_rx))
            .await
            .unwrap();

        let status = ctx.status(Exchange::Okx).unwrap();
        assert!(status.failed);
        assert!(!status.connected);
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.last_error.is_some());
        assert_eq!(ctx.stats.snapshot(Default::default()).reconnections, 2);
    }
}

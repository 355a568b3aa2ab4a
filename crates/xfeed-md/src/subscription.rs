//! Desired-subscription bookkeeping.
//!
//! The registry is the source of truth for what each connection should be
//! streaming. Connection tasks read it on every (re)connect and replay it;
//! live changes are applied here first and then forwarded to the task.

use std::collections::{BTreeMap, BTreeSet};

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use xfeed_core::error::FeedError;
use xfeed_core::types::*;

use crate::registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOp {
    Subscribe,
    Unsubscribe,
}

/// One desired stream on one exchange.
pub type Pair = (String, DataType);

pub struct SubscriptionRegistry {
    market: MarketType,
    sets: RwLock<AHashMap<Exchange, BTreeSet<Pair>>>,
}

impl SubscriptionRegistry {
    pub fn new(exchanges: &[Exchange], market: MarketType) -> Self {
        let sets = exchanges.iter().map(|&e| (e, BTreeSet::new())).collect();
        Self { market, sets: RwLock::new(sets) }
    }

    pub fn market(&self) -> MarketType {
        self.market
    }

    /// Record a desired pair. Returns `true` if it was not already present.
    ///
    /// Accepts canonical (`BTC/USDT`) or venue (`BTCUSDT`) spelling; the pair
    /// is stored canonically. Unsupported combinations are rejected before
    /// anything is stored.
    pub fn subscribe(&self, exchange: Exchange, symbol: &str, data_type: DataType) -> Result<bool, FeedError> {
        let symbol = canonicalize(exchange, symbol);
        self.build_subscribe_message(exchange, &symbol, data_type)?;
        let mut sets = self.sets.write();
        let set = sets.get_mut(&exchange).ok_or(FeedError::ExchangeNotConfigured(exchange))?;
        Ok(set.insert((symbol, data_type)))
    }

    /// Drop a desired pair. Returns `true` if it was present.
    pub fn unsubscribe(&self, exchange: Exchange, symbol: &str, data_type: DataType) -> bool {
        let symbol = canonicalize(exchange, symbol);
        self.sets.write().get_mut(&exchange).is_some_and(|set| set.remove(&(symbol, data_type)))
    }

    pub fn build_subscribe_message(
        &self,
        exchange: Exchange,
        symbol: &str,
        data_type: DataType,
    ) -> Result<String, FeedError> {
        registry::build_message(exchange, SubscribeOp::Subscribe, self.market, symbol, data_type)
    }

    pub fn build_unsubscribe_message(
        &self,
        exchange: Exchange,
        symbol: &str,
        data_type: DataType,
    ) -> Result<String, FeedError> {
        registry::build_message(exchange, SubscribeOp::Unsubscribe, self.market, symbol, data_type)
    }

    /// Subscribe payloads for every desired pair, one per venue stream.
    ///
    /// Pairs that share a venue stream (see [`registry::wire_key`]) produce a
    /// single payload.
    pub fn replay_subscriptions(&self, exchange: Exchange) -> Vec<String> {
        let mut seen = AHashSet::new();
        self.pairs(exchange)
            .into_iter()
            .filter(|(symbol, dt)| match registry::wire_key(exchange, self.market, symbol, *dt) {
                Ok(key) => seen.insert(key),
                Err(_) => false,
            })
            .filter_map(|(symbol, dt)| self.build_subscribe_message(exchange, &symbol, dt).ok())
            .collect()
    }

    /// Desired pairs for `exchange`, in stable order.
    pub fn pairs(&self, exchange: Exchange) -> Vec<Pair> {
        self.sets.read().get(&exchange).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    /// Desired pair count per configured exchange.
    pub fn counts(&self) -> BTreeMap<Exchange, usize> {
        self.sets.read().iter().map(|(e, set)| (*e, set.len())).collect()
    }
}

/// Pairs actually sent on the current connection.
///
/// Rebuilt from scratch on every (re)connect. Guarantees a pair is sent at
/// most once per session, and that a venue stream shared by several pairs is
/// only dropped once none of them still wants it.
pub struct SessionSubscriptions {
    exchange: Exchange,
    market: MarketType,
    sent: BTreeMap<Pair, String>,
}

impl SessionSubscriptions {
    pub fn new(exchange: Exchange, market: MarketType) -> Self {
        Self { exchange, market, sent: BTreeMap::new() }
    }

    /// Mark `pair` as sent; returns the payload to put on the wire, if any.
    pub fn add(&mut self, symbol: &str, data_type: DataType) -> Result<Option<String>, FeedError> {
        let pair = (symbol.to_string(), data_type);
        if self.sent.contains_key(&pair) {
            return Ok(None);
        }
        let key = registry::wire_key(self.exchange, self.market, symbol, data_type)?;
        let shared = self.sent.values().any(|k| *k == key);
        let msg = registry::build_message(self.exchange, SubscribeOp::Subscribe, self.market, symbol, data_type)?;
        self.sent.insert(pair, key);
        Ok((!shared).then_some(msg))
    }

    /// Forget `pair`; returns the unsubscribe payload once its stream is unused.
    pub fn remove(&mut self, symbol: &str, data_type: DataType) -> Result<Option<String>, FeedError> {
        let Some(key) = self.sent.remove(&(symbol.to_string(), data_type)) else {
            return Ok(None);
        };
        if self.sent.values().any(|k| *k == key) {
            return Ok(None);
        }
        registry::build_message(self.exchange, SubscribeOp::Unsubscribe, self.market, symbol, data_type).map(Some)
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

/// Canonical spelling used as the registry key.
pub fn canonicalize(exchange: Exchange, symbol: &str) -> String {
    if symbol::is_canonical(symbol) {
        symbol.to_ascii_uppercase()
    } else {
        symbol::to_canonical(exchange, symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(&[Exchange::Binance, Exchange::Bybit], MarketType::Futures)
    }

    #[test]
    fn subscribe_is_idempotent() {
        let reg = registry();
        assert!(reg.subscribe(Exchange::Binance, "BTC/USDT", DataType::Ticker).unwrap());
        assert!(!reg.subscribe(Exchange::Binance, "BTCUSDT", DataType::Ticker).unwrap());
        assert_eq!(reg.pairs(Exchange::Binance), vec![("BTC/USDT".to_string(), DataType::Ticker)]);
        assert!(reg.unsubscribe(Exchange::Binance, "btc/usdt", DataType::Ticker));
        assert!(!reg.unsubscribe(Exchange::Binance, "BTC/USDT", DataType::Ticker));
    }

    #[test]
    fn unconfigured_exchange_rejected() {
        let err = registry().subscribe(Exchange::Okx, "BTC/USDT", DataType::Ticker).unwrap_err();
        assert!(matches!(err, FeedError::ExchangeNotConfigured(Exchange::Okx)));
    }

    #[test]
    fn spot_funding_rejected_without_storing() {
        let reg = SubscriptionRegistry::new(&[Exchange::Okx], MarketType::Spot);
        assert!(reg.subscribe(Exchange::Okx, "BTC/USDT", DataType::Funding).is_err());
        assert!(reg.pairs(Exchange::Okx).is_empty());
    }

    #[test]
    fn replay_one_payload_per_pair() {
        let reg = registry();
        for dt in [DataType::Ticker, DataType::Trade, DataType::Depth] {
            reg.subscribe(Exchange::Binance, "ETH/USDT", dt).unwrap();
        }
        reg.subscribe(Exchange::Binance, "BTC/USDT", DataType::Ticker).unwrap();
        let replay = reg.replay_subscriptions(Exchange::Binance);
        assert_eq!(replay.len(), 4);
        let unique: BTreeSet<_> = replay.iter().collect();
        assert_eq!(unique.len(), 4);
        assert!(replay.iter().any(|m| m.contains("ethusdt@depth")));
    }

    #[test]
    fn replay_collapses_shared_bybit_topic() {
        let reg = registry();
        reg.subscribe(Exchange::Bybit, "BTC/USDT", DataType::Ticker).unwrap();
        reg.subscribe(Exchange::Bybit, "BTC/USDT", DataType::Funding).unwrap();
        assert_eq!(reg.replay_subscriptions(Exchange::Bybit).len(), 1);
        assert_eq!(reg.counts()[&Exchange::Bybit], 2);
    }

    #[test]
    fn session_sends_each_pair_once() {
        let mut session = SessionSubscriptions::new(Exchange::Binance, MarketType::Futures);
        assert!(session.add("BTC/USDT", DataType::Ticker).unwrap().is_some());
        assert!(session.add("BTC/USDT", DataType::Ticker).unwrap().is_none());
        assert_eq!(session.len(), 1);
        let unsub = session.remove("BTC/USDT", DataType::Ticker).unwrap().unwrap();
        assert!(unsub.contains("btcusdt@ticker"));
        assert!(session.remove("BTC/USDT", DataType::Ticker).unwrap().is_none());
        assert!(session.is_empty());
    }

    #[test]
    fn session_keeps_shared_topic_until_last_user() {
        let mut session = SessionSubscriptions::new(Exchange::Bybit, MarketType::Futures);
        assert!(session.add("BTC/USDT", DataType::Ticker).unwrap().is_some());
        assert!(session.add("BTC/USDT", DataType::Funding).unwrap().is_none());
        assert!(session.remove("BTC/USDT", DataType::Ticker).unwrap().is_none());
        let unsub = session.remove("BTC/USDT", DataType::Funding).unwrap().unwrap();
        assert!(unsub.contains("\"unsubscribe\""));
        assert!(unsub.contains("tickers.BTCUSDT"));
    }

    #[test]
    fn messages_are_pure() {
        let reg = registry();
        let a = reg.build_subscribe_message(Exchange::Binance, "BTC/USDT", DataType::Trade).unwrap();
        let b = reg.build_subscribe_message(Exchange::Binance, "BTC/USDT", DataType::Trade).unwrap();
        assert_eq!(a, b);
        let unsub = reg.build_unsubscribe_message(Exchange::Binance, "BTC/USDT", DataType::Trade).unwrap();
        assert!(unsub.contains("UNSUBSCRIBE"));
    }
}

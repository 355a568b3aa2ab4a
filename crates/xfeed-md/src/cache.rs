//! Last-value caches behind the engine read API.
//!
//! Each record kind has its own bounded map keyed by `(exchange, symbol)`,
//! plus a cross-exchange entry keyed by `symbol` alone that always holds the
//! most recent write from any venue. Trades keep a short history instead of
//! a single value.

use std::collections::VecDeque;

use parking_lot::RwLock;
use xfeed_core::config::CacheConfig;
use xfeed_core::types::*;

use crate::bounded::BoundedMap;

/// `None` exchange = cross-exchange slot.
type Key = (Option<Exchange>, String);

pub struct MarketCache {
    tickers: RwLock<BoundedMap<Key, Ticker>>,
    depths: RwLock<BoundedMap<Key, Depth>>,
    funding: RwLock<BoundedMap<Key, FundingRate>>,
    klines: RwLock<BoundedMap<Key, Kline>>,
    trades: RwLock<BoundedMap<(Exchange, String), VecDeque<Trade>>>,
    trade_history: usize,
}

impl MarketCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cap = config.max_entries;
        Self {
            tickers: RwLock::new(BoundedMap::new(cap)),
            depths: RwLock::new(BoundedMap::new(cap)),
            funding: RwLock::new(BoundedMap::new(cap)),
            klines: RwLock::new(BoundedMap::new(cap)),
            trades: RwLock::new(BoundedMap::new(cap)),
            trade_history: config.trade_history.max(1),
        }
    }

    /// Overwrite the slot(s) for `record`.
    pub fn update(&self, record: &MarketRecord) {
        match record {
            MarketRecord::Ticker(r) => write_both(&self.tickers, r.exchange, &r.symbol, r),
            MarketRecord::Depth(r) => write_both(&self.depths, r.exchange, &r.symbol, r),
            MarketRecord::Funding(r) => write_both(&self.funding, r.exchange, &r.symbol, r),
            MarketRecord::Kline(r) => write_both(&self.klines, r.exchange, &r.symbol, r),
            MarketRecord::Trade(r) => {
                let key = (r.exchange, r.symbol.clone());
                let mut trades = self.trades.write();
                let history = trades.get_or_insert_default(key);
                history.push_back(r.clone());
                while history.len() > self.trade_history {
                    history.pop_front();
                }
            }
        }
    }

    /// Latest ticker for `symbol` on `exchange`, or from any exchange.
    pub fn ticker(&self, symbol: &str, exchange: Option<Exchange>) -> Option<Ticker> {
        read(&self.tickers, symbol, exchange)
    }

    pub fn depth(&self, symbol: &str, exchange: Option<Exchange>) -> Option<Depth> {
        read(&self.depths, symbol, exchange)
    }

    pub fn funding_rate(&self, symbol: &str, exchange: Option<Exchange>) -> Option<FundingRate> {
        read(&self.funding, symbol, exchange)
    }

    pub fn kline(&self, symbol: &str, exchange: Option<Exchange>) -> Option<Kline> {
        read(&self.klines, symbol, exchange)
    }

    /// Up to `limit` most recent trades, oldest first.
    pub fn recent_trades(&self, exchange: Exchange, symbol: &str, limit: usize) -> Vec<Trade> {
        let trades = self.trades.read();
        let Some(history) = trades.get(&(exchange, symbol.to_string())) else {
            return Vec::new();
        };
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Number of `(exchange, symbol)` + cross-exchange ticker slots in use.
    pub fn ticker_slots(&self) -> usize {
        self.tickers.read().len()
    }
}

fn write_both<T: Clone>(map: &RwLock<BoundedMap<Key, T>>, exchange: Exchange, symbol: &str, value: &T) {
    let mut map = map.write();
    map.insert((Some(exchange), symbol.to_string()), value.clone());
    map.insert((None, symbol.to_string()), value.clone());
}

fn read<T: Clone>(map: &RwLock<BoundedMap<Key, T>>, symbol: &str, exchange: Option<Exchange>) -> Option<T> {
    map.read().get(&(exchange, symbol.to_string())).cloned()
}

//! Bybit v5 public-stream normalizer.
//!
//! Routes by the `topic` prefix:
//!
//! - `tickers.*` → [`Ticker`] (plus [`FundingRate`] on linear)
//! - `orderbook.*` → [`Depth`], after applying the frame to a local book
//! - `publicTrade.*` → batched [`Trade`]s
//! - `kline.*` → [`Kline`]
//!
//! Bybit sends `tickers` and `orderbook` as one snapshot followed by deltas
//! that only carry changed fields. Both are folded into per-symbol state held
//! by the normalizer so every emitted record is complete.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use xfeed_core::clock::ClockSync;
use xfeed_core::types::*;

use crate::bounded::BoundedMap;
use crate::json_util::*;
use crate::normalizer::{FrameKind, MAX_TRACKED_SYMBOLS, Normalizer};
use crate::order_book::OrderBook;

/// Levels kept per side for `orderbook.50`.
pub const BOOK_DEPTH: usize = 50;

pub struct BybitNormalizer {
    market: MarketType,
    clock: Arc<ClockSync>,
    tickers: Mutex<BoundedMap<String, Map<String, Value>>>,
    books: Mutex<BoundedMap<String, OrderBook<BOOK_DEPTH>>>,
}

impl BybitNormalizer {
    pub fn new(market: MarketType, clock: Arc<ClockSync>) -> Self {
        Self {
            market,
            clock,
            tickers: Mutex::new(BoundedMap::new(MAX_TRACKED_SYMBOLS)),
            books: Mutex::new(BoundedMap::new(MAX_TRACKED_SYMBOLS)),
        }
    }

    fn stamp(&self, ts: Option<&Value>) -> u64 {
        self.clock.unify(Exchange::Bybit, parse_ts(ts))
    }

    /// Fold a `tickers` frame into the symbol's snapshot and return the
    /// merged view. Re-applying the same frame is harmless. A delta with no
    /// snapshot to land on yields `None`.
    fn merged_ticker(&self, frame: &Value) -> Option<Map<String, Value>> {
        let data = frame.get("data")?.as_object()?;
        let sym = data.get("symbol")?.as_str()?;

        let mut tickers = self.tickers.lock();
        let snap = if is_type(frame, "delta") {
            tickers.get_mut(&sym.to_string())?
        } else {
            let snap = tickers.get_or_insert_default(sym.to_string());
            snap.clear();
            snap
        };
        for (k, v) in data {
            snap.insert(k.clone(), v.clone());
        }
        Some(snap.clone())
    }
}

fn is_type(frame: &Value, expected: &str) -> bool {
    frame.get("type").and_then(Value::as_str) == Some(expected)
}

/// Map Bybit kline intervals (`1`, `60`, `240`, `D`, `W`, `M`) to the
/// canonical spelling.
pub fn canonical_interval(raw: &str) -> String {
    match raw {
        "D" => "1d".to_string(),
        "W" => "1w".to_string(),
        "M" => "1M".to_string(),
        _ => match raw.parse::<u64>() {
            Ok(m) if m > 0 && m % 1440 == 0 => format!("{}d", m / 1440),
            Ok(m) if m > 0 && m % 60 == 0 => format!("{}h", m / 60),
            Ok(m) => format!("{m}m"),
            Err(_) => raw.to_string(),
        },
    }
}

impl Normalizer for BybitNormalizer {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    fn classify(&self, frame: &Value) -> FrameKind {
        let Some(topic) = frame.get("topic").and_then(Value::as_str) else {
            // {"success":true,"ret_msg":"","op":"subscribe"} and ping replies.
            let is_reply = ["op", "success", "ret_msg"].iter().any(|k| frame.get(*k).is_some());
            return if is_reply { FrameKind::Control } else { FrameKind::Unknown };
        };
        match topic.split('.').next() {
            Some("tickers") if self.market == MarketType::Futures => FrameKind::TickerWithFunding,
            Some("tickers") => FrameKind::Data(DataType::Ticker),
            Some("orderbook") => FrameKind::Data(DataType::Depth),
            Some("publicTrade") => FrameKind::Data(DataType::Trade),
            Some("kline") => FrameKind::Data(DataType::Kline),
            _ => FrameKind::Unknown,
        }
    }

    fn rejection(&self, frame: &Value) -> Option<String> {
        // {"success":false,"ret_msg":"Invalid symbol :[tickers.FOOUSDT]","op":"subscribe"}
        if frame.get("success")?.as_bool()? {
            return None;
        }
        Some(frame.get("ret_msg").and_then(Value::as_str).unwrap_or("request failed").to_string())
    }

    fn trade_items(&self, frame: &Value) -> usize {
        frame.get("data").and_then(Value::as_array).map_or(1, Vec::len)
    }

    fn reset(&self) {
        self.tickers.lock().clear();
        self.books.lock().clear();
    }

    fn ticker(&self, frame: &Value) -> Option<Ticker> {
        let m = Value::Object(self.merged_ticker(frame)?);
        let symbol = symbol::to_canonical(Exchange::Bybit, m.get("symbol")?.as_str()?);
        let last = parse_f64_field(&m, "lastPrice")?;
        let open = parse_f64_field(&m, "prevPrice24h")?;
        let (change, derived_pct) = change_from_open(last, open);
        // price24hPcnt is a fraction ("0.0123" == 1.23%).
        let change_percent = match parse_maybe_f64(&m, "price24hPcnt").ok()? {
            Some(p) => p * 100.0,
            None => derived_pct,
        };
        let (funding_rate, next_funding_time) = match self.market {
            MarketType::Futures => (parse_maybe_f64(&m, "fundingRate").ok()?, parse_str_u64(m.get("nextFundingTime"))),
            MarketType::Spot => (None, None),
        };

        Some(Ticker {
            exchange: Exchange::Bybit,
            symbol,
            timestamp: self.stamp(frame.get("ts")),
            last,
            // Spot tickers carry no book fields.
            bid: parse_optional_f64(&m, "bid1Price")?,
            bid_size: parse_optional_f64(&m, "bid1Size")?,
            ask: parse_optional_f64(&m, "ask1Price")?,
            ask_size: parse_optional_f64(&m, "ask1Size")?,
            open,
            high: parse_f64_field(&m, "highPrice24h")?,
            low: parse_f64_field(&m, "lowPrice24h")?,
            volume: parse_f64_field(&m, "volume24h")?,
            quote_volume: parse_f64_field(&m, "turnover24h")?,
            change,
            change_percent,
            funding_rate,
            next_funding_time,
        })
    }

    fn depth(&self, frame: &Value) -> Option<Depth> {
        let data = frame.get("data")?;
        let native = data.get("s")?.as_str()?;
        let bids = parse_levels(data.get("b"))?;
        let asks = parse_levels(data.get("a"))?;

        let mut books = self.books.lock();
        let book = if is_type(frame, "delta") {
            let book = books.get_mut(&native.to_string())?;
            book.update(&bids, &asks);
            book
        } else {
            let book = books.get_or_insert_default(native.to_string());
            book.set_snapshot(&bids, &asks);
            book
        };

        Some(Depth {
            exchange: Exchange::Bybit,
            symbol: symbol::to_canonical(Exchange::Bybit, native),
            timestamp: self.stamp(frame.get("ts")),
            bids: book.bids().to_vec(),
            asks: book.asks().to_vec(),
        })
    }

    fn trades(&self, frame: &Value) -> Vec<Trade> {
        let Some(items) = frame.get("data").and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                Some(Trade {
                    exchange: Exchange::Bybit,
                    symbol: symbol::to_canonical(Exchange::Bybit, item.get("s")?.as_str()?),
                    timestamp: self.stamp(item.get("T").or_else(|| frame.get("ts"))),
                    // Numeric on spot, UUID on linear.
                    trade_id: parse_id(item.get("i"))?,
                    price: parse_f64_field(item, "p")?,
                    amount: parse_f64_field(item, "v")?,
                    side: Side::parse(item.get("S")?.as_str()?)?,
                })
            })
            .collect()
    }

    fn funding(&self, frame: &Value) -> Option<FundingRate> {
        if self.market == MarketType::Spot {
            return None;
        }
        let m = Value::Object(self.merged_ticker(frame)?);

        Some(FundingRate {
            exchange: Exchange::Bybit,
            symbol: symbol::to_canonical(Exchange::Bybit, m.get("symbol")?.as_str()?),
            timestamp: self.stamp(frame.get("ts")),
            mark_price: parse_f64_field(&m, "markPrice")?,
            index_price: parse_f64_field(&m, "indexPrice")?,
            funding_rate: parse_f64_field(&m, "fundingRate")?,
            next_funding_rate: None,
            next_funding_time: parse_str_u64(m.get("nextFundingTime"))?,
        })
    }

    fn kline(&self, frame: &Value) -> Option<Kline> {
        let topic = frame.get("topic")?.as_str()?;
        let native = topic.rsplit('.').next()?;
        let k = frame.get("data")?.as_array()?.first()?;

        Some(Kline {
            exchange: Exchange::Bybit,
            symbol: symbol::to_canonical(Exchange::Bybit, native),
            timestamp: self.stamp(k.get("timestamp").or_else(|| frame.get("ts"))),
            interval: canonical_interval(k.get("interval")?.as_str()?),
            open_time: parse_str_u64(k.get("start"))?,
            close_time: parse_str_u64(k.get("end"))?,
            open: parse_f64_field(k, "open")?,
            high: parse_f64_field(k, "high")?,
            low: parse_f64_field(k, "low")?,
            close: parse_f64_field(k, "close")?,
            volume: parse_f64_field(k, "volume")?,
            quote_volume: parse_maybe_f64(k, "turnover").ok()?,
            trades: None,
            is_closed: parse_bool(k.get("confirm")).unwrap_or(false),
        })
    }
}

//! OKX v5 public-channel normalizer.
//!
//! Routes by `arg.channel`:
//!
//! - `tickers` → [`Ticker`]
//! - `books5` / `bbo-tbt` → [`Depth`] (full snapshots every push)
//! - `books` → [`Depth`], snapshot plus incremental `update` actions
//! - `trades` → batched [`Trade`]s
//! - `funding-rate` → [`FundingRate`]
//! - `candle*` → [`Kline`]
//!
//! Payloads always arrive as a one-or-more element `data` array. Frames with
//! an `event` field are control traffic, except `error`, which is a rejection.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use xfeed_core::clock::ClockSync;
use xfeed_core::time_util;
use xfeed_core::types::*;

use crate::bounded::BoundedMap;
use crate::json_util::*;
use crate::normalizer::{FrameKind, MAX_TRACKED_SYMBOLS, Normalizer};
use crate::order_book::OrderBook;

/// Levels kept per side for the incremental `books` channel.
pub const BOOK_DEPTH: usize = 400;

pub struct OkxNormalizer {
    clock: Arc<ClockSync>,
    books: Mutex<BoundedMap<String, OrderBook<BOOK_DEPTH>>>,
}

impl OkxNormalizer {
    pub fn new(clock: Arc<ClockSync>) -> Self {
        Self { clock, books: Mutex::new(BoundedMap::new(MAX_TRACKED_SYMBOLS)) }
    }

    fn stamp(&self, ts: Option<&Value>) -> u64 {
        self.clock.unify(Exchange::Okx, parse_ts(ts))
    }
}

fn channel(frame: &Value) -> Option<&str> {
    frame.get("arg")?.get("channel")?.as_str()
}

/// First element of `data`, with the instrument id from `arg` or the item.
fn first_item(frame: &Value) -> Option<(&Value, &str)> {
    let item = frame.get("data")?.as_array()?.first()?;
    let inst_id = frame
        .get("arg")
        .and_then(|a| a.get("instId"))
        .or_else(|| item.get("instId"))?
        .as_str()?;
    Some((item, inst_id))
}

/// `candle1H` → `1h`, `candle15m` → `15m`, `candle1Dutc` → `1d`.
///
/// OKX uses `m` for minutes and `M` for months, so only `H`, `D` and `W`
/// are folded to lowercase.
pub fn canonical_interval(channel: &str) -> Option<String> {
    let raw = channel.strip_prefix("candle")?;
    let raw = raw.strip_suffix("utc").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }
    Some(raw.chars().map(|c| if matches!(c, 'H' | 'D' | 'W') { c.to_ascii_lowercase() } else { c }).collect())
}

impl Normalizer for OkxNormalizer {
    fn exchange(&self) -> Exchange {
        Exchange::Okx
    }

    fn classify(&self, frame: &Value) -> FrameKind {
        if frame.get("event").is_some() {
            return FrameKind::Control;
        }
        match channel(frame) {
            Some("tickers") => FrameKind::Data(DataType::Ticker),
            Some("books5" | "bbo-tbt" | "books") => FrameKind::Data(DataType::Depth),
            Some("trades") => FrameKind::Data(DataType::Trade),
            Some("funding-rate") => FrameKind::Data(DataType::Funding),
            Some(c) if c.starts_with("candle") => FrameKind::Data(DataType::Kline),
            _ => FrameKind::Unknown,
        }
    }

    fn rejection(&self, frame: &Value) -> Option<String> {
        if frame.get("event")?.as_str()? != "error" {
            return None;
        }
        let code = frame.get("code").and_then(Value::as_str).unwrap_or("");
        let msg = frame.get("msg").and_then(Value::as_str).unwrap_or("");
        Some(format!("{code} {msg}").trim().to_string())
    }

    fn trade_items(&self, frame: &Value) -> usize {
        frame.get("data").and_then(Value::as_array).map_or(1, Vec::len)
    }

    fn reset(&self) {
        self.books.lock().clear();
    }

    fn ticker(&self, frame: &Value) -> Option<Ticker> {
        let (d, inst_id) = first_item(frame)?;
        let last = parse_f64_field(d, "last")?;
        let open = parse_f64_field(d, "open24h")?;
        let (change, change_percent) = change_from_open(last, open);

        Some(Ticker {
            exchange: Exchange::Okx,
            symbol: symbol::to_canonical(Exchange::Okx, inst_id),
            timestamp: self.stamp(d.get("ts")),
            last,
            bid: parse_f64_field(d, "bidPx")?,
            bid_size: parse_f64_field(d, "bidSz")?,
            ask: parse_f64_field(d, "askPx")?,
            ask_size: parse_f64_field(d, "askSz")?,
            open,
            high: parse_f64_field(d, "high24h")?,
            low: parse_f64_field(d, "low24h")?,
            volume: parse_f64_field(d, "vol24h")?,
            quote_volume: parse_f64_field(d, "volCcy24h")?,
            change,
            change_percent,
            funding_rate: None,
            next_funding_time: None,
        })
    }

    fn depth(&self, frame: &Value) -> Option<Depth> {
        let (d, inst_id) = first_item(frame)?;
        let bids = parse_levels(d.get("bids"))?;
        let asks = parse_levels(d.get("asks"))?;
        let symbol = symbol::to_canonical(Exchange::Okx, inst_id);
        let timestamp = self.stamp(d.get("ts"));

        if channel(frame) != Some("books") {
            return Some(Depth { exchange: Exchange::Okx, symbol, timestamp, bids, asks });
        }

        let mut books = self.books.lock();
        let book = if frame.get("action").and_then(Value::as_str) == Some("update") {
            // An update with no snapshot to land on is dropped.
            let book = books.get_mut(&inst_id.to_string())?;
            book.update(&bids, &asks);
            book
        } else {
            let book = books.get_or_insert_default(inst_id.to_string());
            book.set_snapshot(&bids, &asks);
            book
        };
        Some(Depth {
            exchange: Exchange::Okx,
            symbol,
            timestamp,
            bids: book.bids().to_vec(),
            asks: book.asks().to_vec(),
        })
    }

    fn trades(&self, frame: &Value) -> Vec<Trade> {
        let Some(items) = frame.get("data").and_then(Value::as_array) else {
            return Vec::new();
        };
        let arg_inst = frame.get("arg").and_then(|a| a.get("instId")).and_then(Value::as_str);
        items
            .iter()
            .filter_map(|t| {
                let inst_id = t.get("instId").and_then(Value::as_str).or(arg_inst)?;
                Some(Trade {
                    exchange: Exchange::Okx,
                    symbol: symbol::to_canonical(Exchange::Okx, inst_id),
                    timestamp: self.stamp(t.get("ts")),
                    trade_id: parse_id(t.get("tradeId"))?,
                    price: parse_f64_field(t, "px")?,
                    amount: parse_f64_field(t, "sz")?,
                    side: Side::parse(t.get("side")?.as_str()?)?,
                })
            })
            .collect()
    }

    fn funding(&self, frame: &Value) -> Option<FundingRate> {
        let (d, inst_id) = first_item(frame)?;

        Some(FundingRate {
            exchange: Exchange::Okx,
            symbol: symbol::to_canonical(Exchange::Okx, inst_id),
            timestamp: self.stamp(d.get("ts")),
            // The funding-rate channel does not carry prices.
            mark_price: parse_optional_f64(d, "markPx")?,
            index_price: parse_optional_f64(d, "idxPx")?,
            funding_rate: parse_f64_field(d, "fundingRate")?,
            next_funding_rate: parse_maybe_f64(d, "nextFundingRate").ok()?,
            // `fundingTime` is the upcoming settlement.
            next_funding_time: parse_str_u64(d.get("fundingTime"))?,
        })
    }

    fn kline(&self, frame: &Value) -> Option<Kline> {
        let interval = canonical_interval(channel(frame)?)?;
        let (row, inst_id) = first_item(frame)?;
        let row = row.as_array()?;
        // [ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]
        let open_time = parse_str_u64(row.first())?;
        // Calendar months have no fixed length; their close stays at the open.
        let close_time = if interval.ends_with('M') {
            open_time
        } else {
            open_time.checked_add(time_util::interval_ms(&interval)?)?.checked_sub(1)?
        };

        Some(Kline {
            exchange: Exchange::Okx,
            symbol: symbol::to_canonical(Exchange::Okx, inst_id),
            timestamp: self.clock.unify(Exchange::Okx, parse_ts(row.first())),
            interval,
            open_time,
            close_time,
            open: parse_str_f64(row.get(1))?,
            high: parse_str_f64(row.get(2))?,
            low: parse_str_f64(row.get(3))?,
            close: parse_str_f64(row.get(4))?,
            volume: parse_str_f64(row.get(5))?,
            quote_volume: parse_str_f64(row.get(7)),
            trades: None,
            is_closed: parse_bool(row.get(8)).unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::ParsedFrame;
    use serde_json::json;

    fn normalizer() -> OkxNormalizer {
        OkxNormalizer::new(Arc::new(ClockSync::new(&[Exchange::Okx])))
    }

    #[test]
    fn swap_ticker_symbol_is_canonical() {
        let frame = json!({
            "arg": {"channel": "tickers", "instId": "BTC-USDT-SWAP"},
            "data": [{
                "instType": "SWAP", "instId": "BTC-USDT-SWAP", "last": "9999.99", "lastSz": "0.1",
                "askPx": "9999.99", "askSz": "11", "bidPx": "8888.88", "bidSz": "5",
                "open24h": "9000", "high24h": "10000", "low24h": "8888.88",
                "volCcy24h": "2222", "vol24h": "2222", "sodUtc0": "2222", "sodUtc8": "2222",
                "ts": "1597026383085"
            }]
        });
        let t = normalizer().ticker(&frame).unwrap();
        assert_eq!(t.symbol, "BTC/USDT");
        assert_eq!(t.bid, 8888.88);
        assert!((t.change - 999.99).abs() < 1e-9);
    }

    #[test]
    fn books5_snapshot() {
        let frame = json!({
            "arg": {"channel": "books5", "instId": "ETH-USDT"},
            "data": [{
                "asks": [["3000.1", "2", "0", "1"], ["3000.5", "1", "0", "2"]],
                "bids": [["2999.9", "4", "0", "3"]],
                "instId": "ETH-USDT", "ts": "1672515782136", "seqId": 123
            }]
        });
        let d = normalizer().depth(&frame).unwrap();
        assert_eq!(d.symbol, "ETH/USDT");
        assert_eq!(d.asks.len(), 2);
        assert_eq!(d.best_bid().unwrap().size, 4.0);
    }

    #[test]
    fn books_incremental_update() {
        let n = normalizer();
        let snap = json!({
            "arg": {"channel": "books", "instId": "BTC-USDT"}, "action": "snapshot",
            "data": [{"asks": [["101", "1", "0", "1"]], "bids": [["100", "1", "0", "1"], ["99", "2", "0", "1"]], "ts": "1"}]
        });
        let update = json!({
            "arg": {"channel": "books", "instId": "BTC-USDT"}, "action": "update",
            "data": [{"asks": [], "bids": [["100", "0", "0", "0"]], "ts": "2"}]
        });
        n.depth(&snap).unwrap();
        let d = n.depth(&update).unwrap();
        assert_eq!(d.bids.len(), 1);
        assert_eq!(d.best_bid().unwrap().price, 99.0);
        assert_eq!(d.best_ask().unwrap().price, 101.0);
    }

    #[test]
    fn trades_batch_keeps_side() {
        let frame = json!({
            "arg": {"channel": "trades", "instId": "BTC-USDT-SWAP"},
            "data": [
                {"instId": "BTC-USDT-SWAP", "tradeId": "130639474", "px": "42219.9", "sz": "0.12",
                 "side": "buy", "ts": "1630048897897"},
                {"instId": "BTC-USDT-SWAP", "tradeId": "130639475", "px": "42219.8", "sz": "0.5",
                 "side": "sell", "ts": "1630048897898"}
            ]
        });
        let trades = normalizer().trades(&frame);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[1].side, Side::Sell);
        assert_eq!(trades[1].trade_id, "130639475");
        assert_eq!(trades[0].symbol, "BTC/USDT");
    }

    #[test]
    fn funding_rate_without_prices() {
        let frame = json!({
            "arg": {"channel": "funding-rate", "instId": "BTC-USD-SWAP"},
            "data": [{
                "fundingRate": "0.0001515", "fundingTime": "1622822400000", "instId": "BTC-USD-SWAP",
                "instType": "SWAP", "method": "next_period", "nextFundingRate": "0.00029",
                "nextFundingTime": "1622851200000", "ts": "1622800000000"
            }]
        });
        let f = normalizer().funding(&frame).unwrap();
        assert_eq!(f.symbol, "BTC/USD");
        assert_eq!(f.mark_price, 0.0);
        assert_eq!(f.funding_rate, 0.0001515);
        assert_eq!(f.next_funding_rate, Some(0.00029));
        assert_eq!(f.next_funding_time, 1622822400000);
    }

    #[test]
    fn candle_channel() {
        let frame = json!({
            "arg": {"channel": "candle1H", "instId": "BTC-USDT-SWAP"},
            "data": [["1597026383085", "8533.02", "8553.74", "8527.17", "8548.26",
                      "45247", "529.5858061", "4529405.3", "0"]]
        });
        let k = normalizer().kline(&frame).unwrap();
        assert_eq!(k.interval, "1h");
        assert_eq!(k.open_time, 1597026383085);
        assert_eq!(k.close_time, 1597026383085 + 3_600_000 - 1);
        assert_eq!(k.quote_volume, Some(4529405.3));
        assert!(!k.is_closed);
        assert_eq!(canonical_interval("candle15m").as_deref(), Some("15m"));
        assert_eq!(canonical_interval("candle1Dutc").as_deref(), Some("1d"));
        assert_eq!(canonical_interval("candle1M").as_deref(), Some("1M"));
    }

    #[test]
    fn candle_with_bad_interval_or_open_time_rejected() {
        let row = json!([["0", "1", "1", "1", "1", "1", "1", "1", "0"]]);
        let zero = json!({"arg": {"channel": "candle0H", "instId": "BTC-USDT"}, "data": row});
        assert!(normalizer().kline(&zero).is_none());

        let row = json!([["18446744073709551615", "1", "1", "1", "1", "1", "1", "1", "0"]]);
        let overflow = json!({"arg": {"channel": "candle1H", "instId": "BTC-USDT"}, "data": row});
        assert!(normalizer().kline(&overflow).is_none());
        assert_eq!(normalizer().parse_frame(&overflow.to_string()), ParsedFrame::Invalid);

        let row = json!([["1700000000000", "1", "1", "1", "1", "1", "1", "1", "1"]]);
        let month = json!({"arg": {"channel": "candle1M", "instId": "BTC-USDT"}, "data": row});
        assert_eq!(normalizer().kline(&month).unwrap().close_time, 1700000000000);
    }

    #[test]
    fn books_update_needs_snapshot() {
        let n = normalizer();
        let update = json!({
            "arg": {"channel": "books", "instId": "BTC-USDT"}, "action": "update",
            "data": [{"bids": [["100", "1", "0", "1"]], "asks": [], "ts": "1"}]
        });
        assert!(n.depth(&update).is_none());

        let snapshot = json!({
            "arg": {"channel": "books", "instId": "BTC-USDT"}, "action": "snapshot",
            "data": [{"bids": [["99", "1", "0", "1"]], "asks": [["101", "1", "0", "1"]], "ts": "1"}]
        });
        n.depth(&snapshot).unwrap();
        assert_eq!(n.depth(&update).unwrap().bids.len(), 2);

        n.reset();
        assert!(n.depth(&update).is_none());
    }

    #[test]
    fn empty_trade_batch_is_not_an_error() {
        let n = normalizer();
        let empty = json!({"arg": {"channel": "trades", "instId": "BTC-USDT"}, "data": []});
        assert_eq!(n.parse_frame(&empty.to_string()), ParsedFrame::Records(vec![]));
        let bad = json!({
            "arg": {"channel": "trades", "instId": "BTC-USDT"},
            "data": [{"instId": "BTC-USDT", "tradeId": "1", "px": "abc", "sz": "1", "side": "buy", "ts": "1"}]
        });
        assert_eq!(n.parse_frame(&bad.to_string()), ParsedFrame::Invalid);
    }

    #[test]
    fn events_are_control() {
        let n = normalizer();
        let ack = r#"{"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT"},"connId":"a4d3ae55"}"#;
        let err = r#"{"event":"error","code":"60012","msg":"Invalid request","connId":"a4d3ae55"}"#;
        assert_eq!(n.parse_frame(ack), ParsedFrame::Control);
        assert_eq!(n.parse_frame(err), ParsedFrame::Rejected("60012 Invalid request".into()));
        assert_eq!(n.parse_frame(r#"{"arg":{"channel":"status"},"data":[]}"#), ParsedFrame::Invalid);
    }
}

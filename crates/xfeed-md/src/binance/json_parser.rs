//! Binance JSON normalizer.
//!
//! Routes by the `e` (event type) field:
//!
//! - `24hrTicker` → [`Ticker`]
//! - `depthUpdate` (and partial-book `bids`/`asks` snapshots) → [`Depth`]
//! - `trade` / `aggTrade` → [`Trade`]
//! - `markPriceUpdate` → [`FundingRate`]
//! - `kline` → [`Kline`]
//!
//! Combined-stream frames (`{"stream": "...", "data": {...}}`) are unwrapped
//! first; the stream name supplies the symbol when the payload omits it.

use std::sync::Arc;

use serde_json::Value;
use xfeed_core::clock::ClockSync;
use xfeed_core::types::*;

use crate::json_util::*;
use crate::normalizer::{FrameKind, Normalizer};

/// Normalizer for Binance spot and USDⓈ-M futures streams.
pub struct BinanceNormalizer {
    clock: Arc<ClockSync>,
}

impl BinanceNormalizer {
    pub fn new(clock: Arc<ClockSync>) -> Self {
        Self { clock }
    }

    fn stamp(&self, v: &Value) -> u64 {
        let ts = parse_ts(v.get("E")).or_else(|| parse_ts(v.get("T")));
        self.clock.unify(Exchange::Binance, ts)
    }
}

/// Strip the combined-stream wrapper if present.
fn payload(frame: &Value) -> &Value {
    match (frame.get("stream"), frame.get("data")) {
        (Some(_), Some(data)) => data,
        _ => frame,
    }
}

/// Native symbol from the payload `s`, or from the stream name prefix.
fn native_symbol(frame: &Value, v: &Value) -> Option<String> {
    if let Some(s) = v.get("s").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    let stream = frame.get("stream")?.as_str()?;
    let (sym, _) = stream.split_once('@')?;
    Some(sym.to_ascii_uppercase())
}

fn canonical(frame: &Value, v: &Value) -> Option<String> {
    native_symbol(frame, v).map(|s| symbol::to_canonical(Exchange::Binance, &s))
}

impl Normalizer for BinanceNormalizer {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn classify(&self, frame: &Value) -> FrameKind {
        let v = payload(frame);
        match v.get("e").and_then(Value::as_str) {
            Some("24hrTicker") => FrameKind::Data(DataType::Ticker),
            Some("depthUpdate") => FrameKind::Data(DataType::Depth),
            Some("trade") | Some("aggTrade") => FrameKind::Data(DataType::Trade),
            Some("markPriceUpdate") => FrameKind::Data(DataType::Funding),
            Some("kline") => FrameKind::Data(DataType::Kline),
            Some(_) => FrameKind::Unknown,
            None if v.get("lastUpdateId").is_some() => FrameKind::Data(DataType::Depth),
            // {"result": null, "id": 1} acks.
            None if v.get("id").is_some() => FrameKind::Control,
            None => FrameKind::Unknown,
        }
    }

    fn rejection(&self, frame: &Value) -> Option<String> {
        // {"error": {"code": 2, "msg": "Invalid request: unknown variant"}, "id": 1}
        let err = frame.get("error")?;
        Some(err.get("msg").and_then(Value::as_str).map_or_else(|| err.to_string(), str::to_string))
    }

    fn ticker(&self, frame: &Value) -> Option<Ticker> {
        let v = payload(frame);
        let symbol = canonical(frame, v)?;
        let last = parse_f64_field(v, "c")?;
        let open = parse_f64_field(v, "o")?;
        let (derived_change, derived_pct) = change_from_open(last, open);

        Some(Ticker {
            exchange: Exchange::Binance,
            symbol,
            timestamp: self.stamp(v),
            last,
            // Futures tickers carry no book fields.
            bid: parse_optional_f64(v, "b")?,
            bid_size: parse_optional_f64(v, "B")?,
            ask: parse_optional_f64(v, "a")?,
            ask_size: parse_optional_f64(v, "A")?,
            open,
            high: parse_f64_field(v, "h")?,
            low: parse_f64_field(v, "l")?,
            volume: parse_f64_field(v, "v")?,
            quote_volume: parse_f64_field(v, "q")?,
            change: parse_maybe_f64(v, "p").ok()?.unwrap_or(derived_change),
            change_percent: parse_maybe_f64(v, "P").ok()?.unwrap_or(derived_pct),
            funding_rate: None,
            next_funding_time: None,
        })
    }

    fn depth(&self, frame: &Value) -> Option<Depth> {
        let v = payload(frame);
        let symbol = canonical(frame, v)?;
        let bids = parse_levels(v.get("b").or_else(|| v.get("bids")))?;
        let asks = parse_levels(v.get("a").or_else(|| v.get("asks")))?;

        Some(Depth { exchange: Exchange::Binance, symbol, timestamp: self.stamp(v), bids, asks })
    }

    fn trades(&self, frame: &Value) -> Vec<Trade> {
        self.single_trade(frame).into_iter().collect()
    }

    fn funding(&self, frame: &Value) -> Option<FundingRate> {
        let v = payload(frame);
        let symbol = canonical(frame, v)?;

        Some(FundingRate {
            exchange: Exchange::Binance,
            symbol,
            timestamp: self.stamp(v),
            mark_price: parse_f64_field(v, "p")?,
            index_price: parse_f64_field(v, "i")?,
            funding_rate: parse_f64_field(v, "r")?,
            next_funding_rate: None,
            next_funding_time: parse_str_u64(v.get("T"))?,
        })
    }

    fn kline(&self, frame: &Value) -> Option<Kline> {
        let v = payload(frame);
        let k = v.get("k")?;
        let symbol = match k.get("s").and_then(Value::as_str) {
            Some(s) => symbol::to_canonical(Exchange::Binance, s),
            None => canonical(frame, v)?,
        };

        Some(Kline {
            exchange: Exchange::Binance,
            symbol,
            timestamp: self.stamp(v),
            interval: k.get("i")?.as_str()?.to_string(),
            open_time: parse_str_u64(k.get("t"))?,
            close_time: parse_str_u64(k.get("T"))?,
            open: parse_f64_field(k, "o")?,
            high: parse_f64_field(k, "h")?,
            low: parse_f64_field(k, "l")?,
            close: parse_f64_field(k, "c")?,
            volume: parse_f64_field(k, "v")?,
            quote_volume: parse_maybe_f64(k, "q").ok()?,
            trades: parse_str_u64(k.get("n")),
            is_closed: parse_bool(k.get("x")).unwrap_or(false),
        })
    }
}

impl BinanceNormalizer {
    fn single_trade(&self, frame: &Value) -> Option<Trade> {
        let v = payload(frame);
        let symbol = canonical(frame, v)?;
        // `trade` events carry `t`, `aggTrade` events carry `a`.
        let trade_id = parse_id(v.get("t")).or_else(|| parse_id(v.get("a")))?;
        let is_buyer_maker = parse_bool(v.get("m"))?;
        let ts = parse_ts(v.get("T")).or_else(|| parse_ts(v.get("E")));

        Some(Trade {
            exchange: Exchange::Binance,
            symbol,
            timestamp: self.clock.unify(Exchange::Binance, ts),
            trade_id,
            price: parse_f64_field(v, "p")?,
            amount: parse_f64_field(v, "q")?,
            side: Side::from_buyer_maker(is_buyer_maker),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::ParsedFrame;
    use serde_json::json;

    fn normalizer() -> BinanceNormalizer {
        BinanceNormalizer::new(Arc::new(ClockSync::new(&[Exchange::Binance])))
    }

    #[test]
    fn parse_spot_ticker() {
        let frame = json!({
            "e": "24hrTicker", "E": 1672515782136u64, "s": "BTCUSDT",
            "p": "500.00", "P": "1.01", "c": "50000.00", "Q": "0.01",
            "b": "49990.00", "B": "1.5", "a": "50010.00", "A": "2.5",
            "o": "49500.00", "h": "50500.00", "l": "49000.00",
            "v": "1234.5", "q": "61725000.0"
        });
        let t = normalizer().ticker(&frame).unwrap();
        assert_eq!(t.symbol, "BTC/USDT");
        assert_eq!(t.last, 50000.0);
        assert_eq!(t.bid, 49990.0);
        assert_eq!(t.ask, 50010.0);
        assert_eq!(t.bid_size, 1.5);
        assert_eq!(t.change, 500.0);
        assert_eq!(t.change_percent, 1.01);
        assert!(t.funding_rate.is_none());
    }

    #[test]
    fn futures_ticker_without_book_fields() {
        let frame = json!({
            "e": "24hrTicker", "E": 1u64, "s": "ETHUSDT", "c": "2000", "o": "1900",
            "h": "2100", "l": "1800", "v": "10", "q": "20000"
        });
        let t = normalizer().ticker(&frame).unwrap();
        assert_eq!(t.bid, 0.0);
        assert_eq!(t.ask_size, 0.0);
        assert_eq!(t.change, 100.0);
    }

    #[test]
    fn malformed_numeric_rejects_record() {
        let frame = json!({
            "e": "24hrTicker", "s": "BTCUSDT", "c": "NaN", "o": "1", "h": "1", "l": "1", "v": "1", "q": "1"
        });
        assert!(normalizer().ticker(&frame).is_none());
        assert_eq!(normalizer().parse_frame(&frame.to_string()), ParsedFrame::Invalid);
    }

    #[test]
    fn trade_side_polarity() {
        let n = normalizer();
        let sell = json!({"e": "trade", "E": 1, "s": "BTCUSDT", "t": 12345, "p": "16500.50", "q": "0.001", "T": 2, "m": true});
        let buy = json!({"e": "aggTrade", "E": 1, "s": "BTCUSDT", "a": 99, "p": "16500.50", "q": "0.001", "T": 2, "m": false});
        let sell = n.trades(&sell);
        let buy = n.trades(&buy);
        assert_eq!(sell[0].side, Side::Sell);
        assert_eq!(sell[0].trade_id, "12345");
        assert_eq!(buy[0].side, Side::Buy);
        assert_eq!(buy[0].trade_id, "99");
    }

    #[test]
    fn depth_update_keeps_order() {
        let frame = json!({
            "e": "depthUpdate", "E": 1, "s": "BTCUSDT", "U": 1, "u": 2,
            "b": [["100.0", "1"], ["99.0", "2"]], "a": [["101.0", "1"], ["102.0", "3"]]
        });
        let d = normalizer().depth(&frame).unwrap();
        assert_eq!(d.bids[0].price, 100.0);
        assert_eq!(d.bids[1].price, 99.0);
        assert_eq!(d.asks[1].size, 3.0);
    }

    #[test]
    fn combined_stream_partial_book() {
        let frame = json!({
            "stream": "ethusdt@depth5",
            "data": {"lastUpdateId": 10, "bids": [["1", "1"]], "asks": [["2", "1"]]}
        });
        let n = normalizer();
        assert_eq!(n.classify(&frame), FrameKind::Data(DataType::Depth));
        assert_eq!(n.depth(&frame).unwrap().symbol, "ETH/USDT");
    }

    #[test]
    fn mark_price_to_funding() {
        let frame = json!({
            "e": "markPriceUpdate", "E": 1562305380000u64, "s": "BTCUSDT",
            "p": "11794.15", "i": "11784.62", "P": "11784.25", "r": "0.00038167", "T": 1562306400000u64
        });
        let f = normalizer().funding(&frame).unwrap();
        assert_eq!(f.symbol, "BTC/USDT");
        assert_eq!(f.mark_price, 11794.15);
        assert_eq!(f.funding_rate, 0.00038167);
        assert_eq!(f.next_funding_time, 1562306400000);
    }

    #[test]
    fn kline_event() {
        let frame = json!({
            "e": "kline", "E": 1, "s": "BTCUSDT",
            "k": {"t": 1000, "T": 3600999, "s": "BTCUSDT", "i": "1h", "o": "1", "c": "2",
                  "h": "3", "l": "0.5", "v": "100", "n": 42, "x": false, "q": "150"}
        });
        let k = normalizer().kline(&frame).unwrap();
        assert_eq!(k.interval, "1h");
        assert_eq!(k.trades, Some(42));
        assert_eq!(k.quote_volume, Some(150.0));
        assert!(!k.is_closed);
    }

    #[test]
    fn subscription_ack_is_control() {
        let n = normalizer();
        assert_eq!(n.parse_frame(r#"{"result":null,"id":1}"#), ParsedFrame::Control);
        assert_eq!(n.parse_frame(r#"{"e":"somethingNew"}"#), ParsedFrame::Invalid);
        let refused = r#"{"error":{"code":2,"msg":"Invalid request: unknown variant"},"id":1}"#;
        assert_eq!(n.parse_frame(refused), ParsedFrame::Rejected("Invalid request: unknown variant".into()));
    }

    #[test]
    fn malformed_trade_is_invalid() {
        let frame = json!({"e": "trade", "E": 1, "s": "BTCUSDT", "t": 1, "p": "abc", "q": "0.001", "T": 2, "m": true});
        assert_eq!(normalizer().parse_frame(&frame.to_string()), ParsedFrame::Invalid);
    }
}

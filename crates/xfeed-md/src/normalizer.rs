//! The per-exchange normalizer capability and its fixed registry.
//!
//! Each venue implements [`Normalizer`]: five extractors that turn one raw
//! frame into canonical records, plus a classifier that tells the connection
//! task which extractor a frame belongs to. The registry is built once at
//! engine construction and looked up by [`Exchange`].

use std::sync::Arc;

use ahash::AHashMap;
use serde_json::Value;
use xfeed_core::clock::ClockSync;
use xfeed_core::types::*;

/// Per-normalizer cap on symbols with local state (ticker snapshots, books).
pub const MAX_TRACKED_SYMBOLS: usize = 1_024;

/// What a raw inbound frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    /// A data frame; may legitimately hold zero records (empty trade batch).
    Records(Vec<MarketRecord>),
    /// Subscription acks, pongs, and other protocol chatter.
    Control,
    /// Malformed or unrecognised data frame. Counted as an error and dropped.
    Invalid,
    /// The venue refused a request (bad symbol, unknown channel).
    Rejected(String),
}

/// Frame classification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data(DataType),
    /// A Bybit linear `tickers` frame carries both ticker and funding fields.
    TickerWithFunding,
    Control,
    Unknown,
}

/// Venue-specific frame normalization.
///
/// Implementations must never panic on hostile input: absent or malformed
/// frames yield `None` / an empty `Vec`.
pub trait Normalizer: Send + Sync {
    fn exchange(&self) -> Exchange;

    fn ticker(&self, frame: &Value) -> Option<Ticker>;
    fn depth(&self, frame: &Value) -> Option<Depth>;
    /// Venues batch trades, so one frame yields zero or more records.
    fn trades(&self, frame: &Value) -> Vec<Trade>;
    fn funding(&self, frame: &Value) -> Option<FundingRate>;
    fn kline(&self, frame: &Value) -> Option<Kline>;

    /// Decide which extractor applies to `frame`.
    fn classify(&self, frame: &Value) -> FrameKind;

    /// Error text when `frame` is the venue refusing a request.
    fn rejection(&self, _frame: &Value) -> Option<String> {
        None
    }

    /// Trade items `frame` carries, valid or not.
    fn trade_items(&self, _frame: &Value) -> usize {
        1
    }

    /// Drop per-symbol state. Called before every new session, since the
    /// venue re-sends snapshots after subscribing.
    fn reset(&self) {}

    /// Text frames that are not JSON but still valid protocol traffic.
    fn is_control_text(&self, text: &str) -> bool {
        text.eq_ignore_ascii_case("pong")
    }

    /// Run the extractor for `kind`.
    fn normalize(&self, kind: DataType, frame: &Value) -> Vec<MarketRecord> {
        match kind {
            DataType::Ticker => self.ticker(frame).map(MarketRecord::Ticker).into_iter().collect(),
            DataType::Depth => self.depth(frame).map(MarketRecord::Depth).into_iter().collect(),
            DataType::Trade => self.trades(frame).into_iter().map(MarketRecord::Trade).collect(),
            DataType::Funding => self.funding(frame).map(MarketRecord::Funding).into_iter().collect(),
            DataType::Kline => self.kline(frame).map(MarketRecord::Kline).into_iter().collect(),
        }
    }

    /// Parse, classify and normalize one inbound text frame.
    fn parse_frame(&self, text: &str) -> ParsedFrame {
        if self.is_control_text(text) {
            return ParsedFrame::Control;
        }
        let Ok(v) = serde_json::from_str::<Value>(text) else {
            return ParsedFrame::Invalid;
        };
        if let Some(reason) = self.rejection(&v) {
            return ParsedFrame::Rejected(reason);
        }
        match self.classify(&v) {
            FrameKind::Control => ParsedFrame::Control,
            FrameKind::Unknown => ParsedFrame::Invalid,
            FrameKind::Data(DataType::Trade) => {
                let records = self.normalize(DataType::Trade, &v);
                // An empty batch is fine; a batch where nothing parsed is not.
                if records.is_empty() && self.trade_items(&v) > 0 {
                    ParsedFrame::Invalid
                } else {
                    ParsedFrame::Records(records)
                }
            }
            FrameKind::Data(kind) => {
                let records = self.normalize(kind, &v);
                if records.is_empty() { ParsedFrame::Invalid } else { ParsedFrame::Records(records) }
            }
            FrameKind::TickerWithFunding => {
                let mut records = self.normalize(DataType::Ticker, &v);
                if records.is_empty() {
                    return ParsedFrame::Invalid;
                }
                records.extend(self.normalize(DataType::Funding, &v));
                ParsedFrame::Records(records)
            }
        }
    }
}

/// Fixed registry of normalizers keyed by exchange.
pub struct NormalizerRegistry {
    normalizers: AHashMap<Exchange, Box<dyn Normalizer>>,
}

impl NormalizerRegistry {
    /// Build normalizers for `exchanges`, all sharing one clock table.
    pub fn new(exchanges: &[Exchange], market: MarketType, clock: Arc<ClockSync>) -> Self {
        let normalizers = exchanges
            .iter()
            .map(|&ex| {
                let n: Box<dyn Normalizer> = match ex {
                    Exchange::Binance => Box::new(crate::binance::BinanceNormalizer::new(clock.clone())),
                    Exchange::Bybit => Box::new(crate::bybit::BybitNormalizer::new(market, clock.clone())),
                    Exchange::Okx => Box::new(crate::okx::OkxNormalizer::new(clock.clone())),
                };
                (ex, n)
            })
            .collect();
        Self { normalizers }
    }

    pub fn get(&self, exchange: Exchange) -> Option<&dyn Normalizer> {
        self.normalizers.get(&exchange).map(|n| n.as_ref())
    }

    /// Dispatch `kind` for `exchange`. Unregistered exchanges yield nothing.
    pub fn normalize(&self, kind: DataType, exchange: Exchange, frame: &Value) -> Vec<MarketRecord> {
        self.get(exchange).map(|n| n.normalize(kind, frame)).unwrap_or_default()
    }

    /// Like [`normalize`](Self::normalize), keyed by exchange name. Unknown
    /// names yield nothing, so this is safe to call speculatively.
    pub fn normalize_named(&self, kind: DataType, exchange: &str, frame: &Value) -> Vec<MarketRecord> {
        match exchange.parse::<Exchange>() {
            Ok(ex) => self.normalize(kind, ex, frame),
            Err(_) => Vec::new(),
        }
    }

    /// Forget `exchange`'s per-symbol state.
    pub fn reset(&self, exchange: Exchange) {
        if let Some(n) = self.get(exchange) {
            n.reset();
        }
    }

    /// Parse a raw text frame received on `exchange`'s connection.
    pub fn parse_frame(&self, exchange: Exchange, text: &str) -> ParsedFrame {
        match self.get(exchange) {
            Some(n) => n.parse_frame(text),
            None => ParsedFrame::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> NormalizerRegistry {
        let clock = Arc::new(ClockSync::new(&Exchange::ALL));
        NormalizerRegistry::new(&Exchange::ALL, MarketType::Futures, clock)
    }

    #[test]
    fn unknown_exchange_yields_nothing() {
        let reg = registry();
        let frame = json!({"e": "trade", "s": "BTCUSDT", "t": 1, "p": "1", "q": "1", "m": true});
        assert!(reg.normalize_named(DataType::Trade, "kraken", &frame).is_empty());
        assert_eq!(reg.normalize_named(DataType::Trade, "binance", &frame).len(), 1);
    }

    #[test]
    fn unregistered_exchange_yields_nothing() {
        let clock = Arc::new(ClockSync::new(&[Exchange::Okx]));
        let reg = NormalizerRegistry::new(&[Exchange::Okx], MarketType::Futures, clock);
        let frame = json!({"e": "trade", "s": "BTCUSDT", "t": 1, "p": "1", "q": "1", "m": true});
        assert!(reg.normalize(DataType::Trade, Exchange::Binance, &frame).is_empty());
        assert_eq!(reg.parse_frame(Exchange::Binance, "{}"), ParsedFrame::Invalid);
    }

    #[test]
    fn null_and_garbage_never_panic() {
        let reg = registry();
        let inputs = [json!(null), json!({}), json!([]), json!("x"), json!({"data": null, "arg": 5})];
        for ex in Exchange::ALL {
            for kind in DataType::ALL {
                for frame in &inputs {
                    assert!(reg.normalize(kind, ex, frame).is_empty(), "{ex} {kind} {frame}");
                }
            }
            assert_eq!(reg.parse_frame(ex, "not json"), ParsedFrame::Invalid);
            assert_eq!(reg.parse_frame(ex, "pong"), ParsedFrame::Control);
        }
    }
}

//! Canonical market data records, the one shape every consumer sees.
//!
//! Records are produced by the per-exchange normalizers and flow through the
//! cache and publisher unchanged. They serialise with camelCase field names
//! so the JSON on the `market_data` channel matches what strategy code
//! expects regardless of source venue.
//!
//! # Conventions
//!
//! - `symbol` is always canonical `BASE/QUOTE`, never the venue spelling.
//! - `timestamp` is the unified wall-clock time in **milliseconds**, already
//!   corrected for the venue's clock offset.
//! - Every `f64` is finite; normalizers drop frames that would violate this.

use serde::{Deserialize, Serialize};

use super::enums::{DataType, Exchange, Side};

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Rolling 24h ticker with top of book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub exchange: Exchange,
    pub symbol: String,
    pub timestamp: u64,
    pub last: f64,
    pub bid: f64,
    pub bid_size: f64,
    pub ask: f64,
    pub ask_size: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub change: f64,
    pub change_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_funding_time: Option<u64>,
}

// ---------------------------------------------------------------------------
// Depth
// ---------------------------------------------------------------------------

/// One `(price, size)` book level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

/// Order book levels, best-to-worst in the order the venue sent them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Depth {
    pub exchange: Exchange,
    pub symbol: String,
    pub timestamp: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl Depth {
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }
}

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// A single public trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub exchange: Exchange,
    pub symbol: String,
    pub timestamp: u64,
    /// Venue trade id. Bybit linear uses UUIDs, so this stays a string.
    pub trade_id: String,
    pub price: f64,
    pub amount: f64,
    pub side: Side,
}

// ---------------------------------------------------------------------------
// Funding rate
// ---------------------------------------------------------------------------

/// Perpetual funding snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRate {
    pub exchange: Exchange,
    pub symbol: String,
    pub timestamp: u64,
    pub mark_price: f64,
    pub index_price: f64,
    pub funding_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_funding_rate: Option<f64>,
    pub next_funding_time: u64,
}

// ---------------------------------------------------------------------------
// Kline
// ---------------------------------------------------------------------------

/// OHLCV candle. `interval` uses the canonical spelling (`1m`, `1h`, `1d`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kline {
    pub exchange: Exchange,
    pub symbol: String,
    pub timestamp: u64,
    pub interval: String,
    pub open_time: u64,
    pub close_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trades: Option<u64>,
    pub is_closed: bool,
}

// ---------------------------------------------------------------------------
// MarketRecord: tagged union for channel passing
// ---------------------------------------------------------------------------

/// A tagged union of all canonical record kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MarketRecord {
    Ticker(Ticker),
    Depth(Depth),
    Trade(Trade),
    Funding(FundingRate),
    Kline(Kline),
}

impl MarketRecord {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Ticker(_) => DataType::Ticker,
            Self::Depth(_) => DataType::Depth,
            Self::Trade(_) => DataType::Trade,
            Self::Funding(_) => DataType::Funding,
            Self::Kline(_) => DataType::Kline,
        }
    }

    pub fn exchange(&self) -> Exchange {
        match self {
            Self::Ticker(r) => r.exchange,
            Self::Depth(r) => r.exchange,
            Self::Trade(r) => r.exchange,
            Self::Funding(r) => r.exchange,
            Self::Kline(r) => r.exchange,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Ticker(r) => &r.symbol,
            Self::Depth(r) => &r.symbol,
            Self::Trade(r) => &r.symbol,
            Self::Funding(r) => &r.symbol,
            Self::Kline(r) => &r.symbol,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Ticker(r) => r.timestamp,
            Self::Depth(r) => r.timestamp,
            Self::Trade(r) => r.timestamp,
            Self::Funding(r) => r.timestamp,
            Self::Kline(r) => r.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Display impls
// ---------------------------------------------------------------------------

impl std::fmt::Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ticker({}:{} last={} bid={}x{} ask={}x{})",
            self.exchange, self.symbol, self.last, self.bid, self.bid_size, self.ask, self.ask_size
        )
    }
}

impl std::fmt::Display for Trade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Trade({}:{} {} {}x{} id={})",
            self.exchange, self.symbol, self.side, self.price, self.amount, self.trade_id
        )
    }
}

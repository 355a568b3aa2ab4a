//! Enumerations used throughout the engine.
//!
//! Every enum serialises to the lowercase identifiers used in config files and
//! in the published JSON (`"binance"`, `"futures"`, `"ticker"`, `"buy"`).

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

// ---------------------------------------------------------------------------
// Exchange identifiers
// ---------------------------------------------------------------------------

/// Supported cryptocurrency exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Bybit,
    Okx,
}

impl Exchange {
    pub const ALL: [Exchange; 3] = [Exchange::Binance, Exchange::Bybit, Exchange::Okx];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Okx => "okx",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "bybit" => Ok(Self::Bybit),
            "okx" => Ok(Self::Okx),
            other => Err(FeedError::UnsupportedExchange(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Market types
// ---------------------------------------------------------------------------

/// Market the engine trades on. Selects endpoints and native symbol spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Spot,
    /// Perpetual / linear derivatives (`futures` in config, `linear` on Bybit,
    /// `SWAP` on OKX).
    #[default]
    #[serde(alias = "swap", alias = "linear")]
    Futures,
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spot => f.write_str("spot"),
            Self::Futures => f.write_str("futures"),
        }
    }
}

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// The five canonical record kinds a subscription can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Ticker,
    Depth,
    Trade,
    #[serde(alias = "fundingrate", alias = "funding_rate")]
    Funding,
    Kline,
}

impl DataType {
    pub const ALL: [DataType; 5] =
        [DataType::Ticker, DataType::Depth, DataType::Trade, DataType::Funding, DataType::Kline];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Depth => "depth",
            Self::Trade => "trade",
            Self::Funding => "funding",
            Self::Kline => "kline",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ticker" => Ok(Self::Ticker),
            "depth" | "orderbook" => Ok(Self::Depth),
            "trade" | "trades" => Ok(Self::Trade),
            "funding" | "fundingrate" | "funding_rate" => Ok(Self::Funding),
            "kline" | "candle" => Ok(Self::Kline),
            other => Err(FeedError::UnknownDataType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade side
// ---------------------------------------------------------------------------

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Case-insensitive `buy`/`sell` parser used by Bybit (`Buy`) and OKX (`buy`).
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("buy") {
            Some(Self::Buy)
        } else if s.eq_ignore_ascii_case("sell") {
            Some(Self::Sell)
        } else {
            None
        }
    }

    /// Binance reports `m` = "buyer is maker", meaning the seller was the taker.
    pub fn from_buyer_maker(is_buyer_maker: bool) -> Self {
        if is_buyer_maker { Self::Sell } else { Self::Buy }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("buy"),
            Self::Sell => f.write_str("sell"),
        }
    }
}

//! Bybit v5 public streams.
//!
//! - Spot (`/v5/public/spot`) and linear perpetuals (`/v5/public/linear`)
//!   live on separate paths; symbols are spelled the same on both.
//! - Subscriptions: `{"op":"subscribe","args":["tickers.BTCUSDT"]}`.
//! - Funding has no topic of its own. It rides on linear `tickers`, so a
//!   funding subscription maps to the same wire topic as a ticker one.
//! - Keep-alive: `{"op":"ping"}` text frames.

pub mod json_parser;

pub use json_parser::BybitNormalizer;

use xfeed_core::error::FeedError;
use xfeed_core::types::*;
use xfeed_core::ws::PingPayload;

use crate::subscription::SubscribeOp;

pub const SPOT_WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";
pub const LINEAR_WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";

/// Kline interval subscribed for `DataType::Kline`, in Bybit's minute units.
pub const KLINE_INTERVAL: &str = "60";

pub fn ws_url(market: MarketType) -> &'static str {
    match market {
        MarketType::Spot => SPOT_WS_URL,
        MarketType::Futures => LINEAR_WS_URL,
    }
}

pub fn ping() -> PingPayload {
    PingPayload::Json(serde_json::json!({"op": "ping"}))
}

/// Wire topic for one pair, e.g. `orderbook.50.BTCUSDT`.
pub fn topic(market: MarketType, symbol: &str, data_type: DataType) -> Result<String, FeedError> {
    let native = symbol::to_native(Exchange::Bybit, market, symbol);
    Ok(match (data_type, market) {
        (DataType::Ticker, _) | (DataType::Funding, MarketType::Futures) => format!("tickers.{native}"),
        (DataType::Depth, _) => format!("orderbook.{}.{native}", json_parser::BOOK_DEPTH),
        (DataType::Trade, _) => format!("publicTrade.{native}"),
        (DataType::Kline, _) => format!("kline.{KLINE_INTERVAL}.{native}"),
        (DataType::Funding, MarketType::Spot) => {
            return Err(FeedError::UnsupportedDataType { exchange: Exchange::Bybit, market, data_type });
        }
    })
}

pub fn build_message(
    op: SubscribeOp,
    market: MarketType,
    symbol: &str,
    data_type: DataType,
) -> Result<String, FeedError> {
    let op = match op {
        SubscribeOp::Subscribe => "subscribe",
        SubscribeOp::Unsubscribe => "unsubscribe",
    };
    Ok(serde_json::json!({
        "op": op,
        "args": [topic(market, symbol, data_type)?]
    })
    .to_string())
}

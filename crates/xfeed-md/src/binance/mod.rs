//! Binance market data: endpoints, keep-alive and subscription wire format.
//!
//! - Spot (`stream.binance.com`) and USDⓈ-M futures (`fstream.binance.com`)
//!   share the same JSON shapes; market type is selected by host only.
//! - Subscriptions: `{"method":"SUBSCRIBE","params":["btcusdt@ticker"],"id":1}`.
//! - Keep-alive: the server pings us; we answer pongs and send WebSocket pings.

pub mod json_parser;

pub use json_parser::BinanceNormalizer;

use xfeed_core::error::FeedError;
use xfeed_core::types::*;
use xfeed_core::ws::PingPayload;

use crate::subscription::SubscribeOp;

pub const SPOT_WS_URL: &str = "wss://stream.binance.com:9443/ws";
pub const FUTURES_WS_URL: &str = "wss://fstream.binance.com/ws";

/// Kline interval subscribed for `DataType::Kline`.
pub const KLINE_INTERVAL: &str = "1h";

pub fn ws_url(market: MarketType) -> &'static str {
    match market {
        MarketType::Spot => SPOT_WS_URL,
        MarketType::Futures => FUTURES_WS_URL,
    }
}

pub fn ping() -> PingPayload {
    PingPayload::WebSocketPing
}

/// Stream name for one `(symbol, data_type)` pair, e.g. `btcusdt@markPrice`.
pub fn stream_name(market: MarketType, symbol: &str, data_type: DataType) -> Result<String, FeedError> {
    let native = symbol::to_native(Exchange::Binance, market, symbol).to_lowercase();
    let suffix = match (data_type, market) {
        (DataType::Ticker, _) => "ticker".to_string(),
        (DataType::Depth, _) => "depth".to_string(),
        (DataType::Trade, _) => "trade".to_string(),
        (DataType::Funding, MarketType::Futures) => "markPrice".to_string(),
        (DataType::Funding, MarketType::Spot) => {
            return Err(FeedError::UnsupportedDataType { exchange: Exchange::Binance, market, data_type });
        }
        (DataType::Kline, _) => format!("kline_{KLINE_INTERVAL}"),
    };
    Ok(format!("{native}@{suffix}"))
}

/// Build a subscribe/unsubscribe request for one pair.
pub fn build_message(
    op: SubscribeOp,
    market: MarketType,
    symbol: &str,
    data_type: DataType,
) -> Result<String, FeedError> {
    let method = match op {
        SubscribeOp::Subscribe => "SUBSCRIBE",
        SubscribeOp::Unsubscribe => "UNSUBSCRIBE",
    };
    Ok(serde_json::json!({
        "method": method,
        "params": [stream_name(market, symbol, data_type)?],
        "id": 1
    })
    .to_string())
}

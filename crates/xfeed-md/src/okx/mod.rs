//! OKX v5 public channels.
//!
//! Spot and swap share one endpoint; the instrument id (`BTC-USDT` vs
//! `BTC-USDT-SWAP`) selects the market. Keep-alive is a literal `"ping"`
//! text frame answered with `"pong"`.

pub mod json_parser;

pub use json_parser::OkxNormalizer;

use xfeed_core::error::FeedError;
use xfeed_core::types::*;
use xfeed_core::ws::PingPayload;

use crate::subscription::SubscribeOp;

pub const WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// Candle channel subscribed for `DataType::Kline`.
pub const KLINE_CHANNEL: &str = "candle1H";

pub fn ws_url(_market: MarketType) -> &'static str {
    WS_URL
}

pub fn ping() -> PingPayload {
    PingPayload::Text("ping".into())
}

/// `(channel, instId)` for one pair.
pub fn channel_arg(market: MarketType, symbol: &str, data_type: DataType) -> Result<serde_json::Value, FeedError> {
    let channel = match (data_type, market) {
        (DataType::Ticker, _) => "tickers",
        (DataType::Depth, _) => "books5",
        (DataType::Trade, _) => "trades",
        (DataType::Funding, MarketType::Futures) => "funding-rate",
        (DataType::Kline, _) => KLINE_CHANNEL,
        (DataType::Funding, MarketType::Spot) => {
            return Err(FeedError::UnsupportedDataType { exchange: Exchange::Okx, market, data_type });
        }
    };
    let inst_id = symbol::to_native(Exchange::Okx, market, symbol);
    Ok(serde_json::json!({"channel": channel, "instId": inst_id}))
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
        "args": [channel_arg(market, symbol, data_type)?]
    })
    .to_string())
}

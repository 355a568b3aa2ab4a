//! Per-exchange protocol dispatch.
//!
//! Every venue module exposes the same free functions (`ws_url`, `ping`,
//! `build_message`); this module picks the right one by [`Exchange`].

use xfeed_core::error::FeedError;
use xfeed_core::types::*;
use xfeed_core::ws::PingPayload;

use crate::subscription::SubscribeOp;

/// Public market-data endpoint for `exchange` on `market`.
pub fn ws_url(exchange: Exchange, market: MarketType) -> &'static str {
    match exchange {
        Exchange::Binance => crate::binance::ws_url(market),
        Exchange::Bybit => crate::bybit::ws_url(market),
        Exchange::Okx => crate::okx::ws_url(market),
    }
}

/// Application-level keep-alive frame for `exchange`.
pub fn ping_payload(exchange: Exchange) -> PingPayload {
    match exchange {
        Exchange::Binance => crate::binance::ping(),
        Exchange::Bybit => crate::bybit::ping(),
        Exchange::Okx => crate::okx::ping(),
    }
}

/// Wire payload subscribing to (or dropping) one `(symbol, data_type)` pair.
pub fn build_message(
    exchange: Exchange,
    op: SubscribeOp,
    market: MarketType,
    symbol: &str,
    data_type: DataType,
) -> Result<String, FeedError> {
    match exchange {
        Exchange::Binance => crate::binance::build_message(op, market, symbol, data_type),
        Exchange::Bybit => crate::bybit::build_message(op, market, symbol, data_type),
        Exchange::Okx => crate::okx::build_message(op, market, symbol, data_type),
    }
}

/// Identity of the venue-side stream a pair maps to.
///
/// Two pairs with the same key share one venue subscription (Bybit ticker and
/// funding both ride `tickers.<SYM>`).
pub fn wire_key(
    exchange: Exchange,
    market: MarketType,
    symbol: &str,
    data_type: DataType,
) -> Result<String, FeedError> {
    match exchange {
        Exchange::Binance => crate::binance::stream_name(market, symbol, data_type),
        Exchange::Bybit => crate::bybit::topic(market, symbol, data_type),
        Exchange::Okx => crate::okx::channel_arg(market, symbol, data_type).map(|v| v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn futures_endpoints() {
        let m = MarketType::Futures;
        assert_eq!(ws_url(Exchange::Binance, m), "wss://fstream.binance.com/ws");
        assert_eq!(ws_url(Exchange::Bybit, m), "wss://stream.bybit.com/v5/public/linear");
        assert_eq!(ws_url(Exchange::Okx, m), "wss://ws.okx.com:8443/ws/v5/public");
    }

    #[test]
    fn ping_payloads() {
        assert_eq!(ping_payload(Exchange::Binance), PingPayload::WebSocketPing);
        assert_eq!(ping_payload(Exchange::Bybit), PingPayload::Json(serde_json::json!({"op": "ping"})));
        assert_eq!(ping_payload(Exchange::Okx), PingPayload::Text("ping".into()));
    }

    #[test]
    fn bybit_funding_shares_ticker_stream() {
        let m = MarketType::Futures;
        let ticker = wire_key(Exchange::Bybit, m, "BTC/USDT", DataType::Ticker).unwrap();
        let funding = wire_key(Exchange::Bybit, m, "BTC/USDT", DataType::Funding).unwrap();
        assert_eq!(ticker, funding);
        let ticker = wire_key(Exchange::Okx, m, "BTC/USDT", DataType::Ticker).unwrap();
        let funding = wire_key(Exchange::Okx, m, "BTC/USDT", DataType::Funding).unwrap();
        assert_ne!(ticker, funding);
    }
}

//! Server-time sampling that feeds [`ClockSync`].
//!
//! Each venue exposes a public "server time" REST endpoint. A periodic task
//! per exchange samples it, estimates the offset from the round-trip midpoint
//! and stores it. Failed requests are logged and leave the last offset in use.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use xfeed_core::clock::ClockSync;
use xfeed_core::time_util;
use xfeed_core::types::{Exchange, MarketType};

use crate::json_util::parse_str_u64;

/// Source of exchange server time, in milliseconds.
#[async_trait]
pub trait ServerClock: Send + Sync {
    async fn server_time_ms(&self, exchange: Exchange) -> Result<u64>;
}

/// [`ServerClock`] backed by each venue's public REST time endpoint.
pub struct HttpServerClock {
    client: reqwest::Client,
    market: MarketType,
}

impl HttpServerClock {
    pub fn new(market: MarketType, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, market })
    }

    pub fn time_url(exchange: Exchange, market: MarketType) -> &'static str {
        match (exchange, market) {
            (Exchange::Binance, MarketType::Spot) => "https://api.binance.com/api/v3/time",
            (Exchange::Binance, MarketType::Futures) => "https://fapi.binance.com/fapi/v1/time",
            (Exchange::Bybit, _) => "https://api.bybit.com/v5/market/time",
            (Exchange::Okx, _) => "https://www.okx.com/api/v5/public/time",
        }
    }
}

#[async_trait]
impl ServerClock for HttpServerClock {
    async fn server_time_ms(&self, exchange: Exchange) -> Result<u64> {
        let url = Self::time_url(exchange, self.market);
        let body: Value = self.client.get(url).send().await?.error_for_status()?.json().await?;
        parse_server_time(exchange, &body).ok_or_else(|| anyhow!("[{exchange}] unexpected server time body: {body}"))
    }
}

/// Pull the millisecond timestamp out of a server-time response.
pub fn parse_server_time(exchange: Exchange, body: &Value) -> Option<u64> {
    match exchange {
        // {"serverTime": 1499827319559}
        Exchange::Binance => parse_str_u64(body.get("serverTime")),
        // {"retCode":0,"result":{"timeSecond":"...","timeNano":"..."},"time":1688639403423}
        Exchange::Bybit => parse_str_u64(body.get("time")).or_else(|| {
            let nanos = parse_str_u64(body.get("result")?.get("timeNano"))?;
            Some(nanos / 1_000_000)
        }),
        // {"code":"0","data":[{"ts":"1597026383085"}],"msg":""}
        Exchange::Okx => parse_str_u64(body.get("data")?.get(0)?.get("ts")),
    }
}

/// Take one sample and store the resulting offset.
pub async fn sync_once(source: &dyn ServerClock, clock: &ClockSync, exchange: Exchange) -> Result<i64> {
    let before = time_util::now_ms();
    let server = source.server_time_ms(exchange).await?;
    let after = time_util::now_ms();
    Ok(clock.record_sample(exchange, before, server, after))
}

/// Resync `exchange` every `interval` until `shutdown` flips.
pub fn spawn_sync_task(
    source: Arc<dyn ServerClock>,
    clock: Arc<ClockSync>,
    exchange: Exchange,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {
                    match sync_once(source.as_ref(), &clock, exchange).await {
                        Ok(offset) => debug!("[clock] {exchange} offset {offset} ms"),
                        Err(e) => warn!("[clock] {exchange} sync failed, keeping previous offset: {e}"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedClock(Option<u64>);

    #[async_trait]
    impl ServerClock for FixedClock {
        async fn server_time_ms(&self, _exchange: Exchange) -> Result<u64> {
            self.0.ok_or_else(|| anyhow!("unreachable"))
        }
    }

    #[test]
    fn parse_bodies() {
        assert_eq!(parse_server_time(Exchange::Binance, &json!({"serverTime": 1499827319559u64})), Some(1499827319559));
        let bybit = json!({"retCode": 0, "result": {"timeSecond": "1688639403", "timeNano": "1688639403423213947"}});
        assert_eq!(parse_server_time(Exchange::Bybit, &bybit), Some(1688639403423));
        let okx = json!({"code": "0", "data": [{"ts": "1597026383085"}], "msg": ""});
        assert_eq!(parse_server_time(Exchange::Okx, &okx), Some(1597026383085));
        assert_eq!(parse_server_time(Exchange::Okx, &json!({"data": []})), None);
    }

    #[tokio::test]
    async fn sample_sets_offset() {
        let clock = ClockSync::new(&[Exchange::Okx]);
        let server = time_util::now_ms() - 5_000;
        let offset = sync_once(&FixedClock(Some(server)), &clock, Exchange::Okx).await.unwrap();
        assert!((4_900..=5_500).contains(&offset), "offset {offset}");
        assert!(clock.offset(Exchange::Okx).unwrap().last_sync_at.is_some());
    }

    #[tokio::test]
    async fn failed_sample_keeps_previous_offset() {
        let clock = ClockSync::new(&[Exchange::Bybit]);
        clock.set_offset(Exchange::Bybit, 42, 1);
        assert!(sync_once(&FixedClock(None), &clock, Exchange::Bybit).await.is_err());
        assert_eq!(clock.offset(Exchange::Bybit).unwrap().offset_ms, 42);
    }
}

//! Outbound fan-out for normalized records.
//!
//! Every record goes two ways:
//!
//! 1. serialized as JSON into a [`MarketSink`]: published on the
//!    [`MARKET_DATA_CHANNEL`] channel and stored under a per-record key
//!    (`market:ticker:binance:BTC/USDT`, trades appended to
//!    `market:trades:{exchange}:{symbol}`);
//! 2. as a typed [`MarketRecord`] on an in-process broadcast channel.
//!
//! The sink is the seam for an external pub/sub store. [`MemorySink`] is the
//! in-process implementation used by default and in tests.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use xfeed_core::types::*;

use crate::bounded::BoundedMap;

pub const MARKET_DATA_CHANNEL: &str = "market_data";

/// External publish/store target.
#[async_trait]
pub trait MarketSink: Send + Sync {
    /// Broadcast `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
    /// Overwrite the value at `key`.
    async fn set(&self, key: &str, payload: &str) -> Result<()>;
    /// Append `payload` to the stream at `key`.
    async fn append(&self, key: &str, payload: &str) -> Result<()>;
}

/// Store key for a record: `market:{kind}:{exchange}:{symbol}`.
pub fn store_key(record: &MarketRecord) -> String {
    let kind = match record.data_type() {
        DataType::Trade => "trades",
        other => other.as_str(),
    };
    format!("market:{kind}:{}:{}", record.exchange(), record.symbol())
}

struct MemoryState {
    published: VecDeque<(String, String)>,
    values: BoundedMap<String, String>,
    streams: BoundedMap<String, VecDeque<String>>,
}

/// Bounded in-memory [`MarketSink`].
///
/// At most `max_keys` values and `max_keys` streams are kept, oldest key
/// evicted first.
pub struct MemorySink {
    state: Mutex<MemoryState>,
    /// Cap for the publish log and for each stream.
    max_len: usize,
}

impl MemorySink {
    pub fn new(max_keys: usize, max_len: usize) -> Self {
        let state = MemoryState {
            published: VecDeque::new(),
            values: BoundedMap::new(max_keys),
            streams: BoundedMap::new(max_keys),
        };
        Self { state: Mutex::new(state), max_len: max_len.max(1) }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().values.get(&key.to_string()).cloned()
    }

    /// Stream contents at `key`, oldest first.
    pub fn stream(&self, key: &str) -> Vec<String> {
        self.state.lock().streams.get(&key.to_string()).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Payloads published on `channel`, oldest first.
    pub fn published(&self, channel: &str) -> Vec<String> {
        self.state.lock().published.iter().filter(|(c, _)| c == channel).map(|(_, p)| p.clone()).collect()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(4_096, 1_000)
    }
}

#[async_trait]
impl MarketSink for MemorySink {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.published.push_back((channel.to_string(), payload.to_string()));
        while state.published.len() > self.max_len {
            state.published.pop_front();
        }
        Ok(())
    }

    async fn set(&self, key: &str, payload: &str) -> Result<()> {
        self.state.lock().values.insert(key.to_string(), payload.to_string());
        Ok(())
    }

    async fn append(&self, key: &str, payload: &str) -> Result<()> {
        let mut state = self.state.lock();
        let stream = state.streams.get_or_insert_default(key.to_string());
        stream.push_back(payload.to_string());
        while stream.len() > self.max_len {
            stream.pop_front();
        }
        Ok(())
    }
}

/// Serializes records and hands them to the sink and the in-process feed.
pub struct Publisher {
    sink: Arc<dyn MarketSink>,
    feed: broadcast::Sender<MarketRecord>,
}

impl Publisher {
    pub fn new(sink: Arc<dyn MarketSink>, capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(16));
        Self { sink, feed }
    }

    pub async fn publish(&self, record: &MarketRecord) -> Result<()> {
        // No receivers is fine: the feed is optional.
        let _ = self.feed.send(record.clone());

        let payload = serde_json::to_string(record)?;
        let key = store_key(record);
        self.sink.publish(MARKET_DATA_CHANNEL, &payload).await?;
        match record {
            MarketRecord::Trade(_) => self.sink.append(&key, &payload).await,
            _ => self.sink.set(&key, &payload).await,
        }
    }

    /// Typed records as they are published.
    pub fn subscribe(&self) -> broadcast::Receiver<MarketRecord> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funding() -> MarketRecord {
        MarketRecord::Funding(FundingRate {
            exchange: Exchange::Binance,
            symbol: "BTC/USDT".into(),
            timestamp: 1,
            mark_price: 1.0,
            index_price: 1.0,
            funding_rate: 0.0001,
            next_funding_rate: None,
            next_funding_time: 2,
        })
    }

    fn trade(id: &str) -> MarketRecord {
        MarketRecord::Trade(Trade {
            exchange: Exchange::Okx,
            symbol: "ETH/USDT".into(),
            timestamp: 1,
            trade_id: id.into(),
            price: 1.0,
            amount: 2.0,
            side: Side::Sell,
        })
    }

    #[test]
    fn keys() {
        assert_eq!(store_key(&funding()), "market:funding:binance:BTC/USDT");
        assert_eq!(store_key(&trade("1")), "market:trades:okx:ETH/USDT");
    }

    #[tokio::test]
    async fn publish_sets_appends_and_broadcasts() {
        let sink = Arc::new(MemorySink::new(16, 10));
        let publisher = Publisher::new(sink.clone(), 16);
        let mut rx = publisher.subscribe();

        publisher.publish(&funding()).await.unwrap();
        publisher.publish(&trade("1")).await.unwrap();
        publisher.publish(&trade("2")).await.unwrap();

        let stored = sink.get("market:funding:binance:BTC/USDT").unwrap();
        assert!(stored.contains("\"kind\":\"funding\""));
        assert!(stored.contains("\"fundingRate\":0.0001"));
        assert_eq!(sink.stream("market:trades:okx:ETH/USDT").len(), 2);
        assert_eq!(sink.published(MARKET_DATA_CHANNEL).len(), 3);
        assert_eq!(rx.recv().await.unwrap(), funding());
    }

    #[tokio::test]
    async fn memory_sink_bounds_keys_and_streams() {
        let sink = MemorySink::new(2, 2);
        for key in ["a", "b", "c"] {
            sink.set(key, key).await.unwrap();
        }
        assert!(sink.get("a").is_none());
        assert_eq!(sink.get("c").as_deref(), Some("c"));

        for (key, payload) in [("s1", "1"), ("s1", "2"), ("s1", "3"), ("s2", "x"), ("s3", "y")] {
            sink.append(key, payload).await.unwrap();
        }
        assert!(sink.stream("s1").is_empty());
        assert_eq!(sink.stream("s3"), vec!["y".to_string()]);
        assert_eq!(sink.published(MARKET_DATA_CHANNEL).len(), 0);
    }
}

//! Engine-wide counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use xfeed_core::time_util;
use xfeed_core::types::Exchange;

/// Lock-free counters shared by every connection task.
#[derive(Debug, Default)]
pub struct StatsCollector {
    messages_received: AtomicU64,
    messages_published: AtomicU64,
    errors: AtomicU64,
    reconnections: AtomicU64,
    /// `0` until the engine starts.
    start_time: AtomicU64,
}

/// Point-in-time view of [`StatsCollector`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub messages_received: u64,
    pub messages_published: u64,
    pub errors: u64,
    pub reconnections: u64,
    pub start_time: Option<u64>,
    pub uptime_seconds: u64,
    pub subscriptions: BTreeMap<Exchange, usize>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_started(&self) {
        self.start_time.store(time_util::now_ms(), Ordering::Relaxed);
    }

    pub fn mark_stopped(&self) {
        self.start_time.store(0, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self, n: u64) {
        self.messages_published.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnection(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, subscriptions: BTreeMap<Exchange, usize>) -> EngineStats {
        let start = self.start_time.load(Ordering::Relaxed);
        let (start_time, uptime_seconds) = if start == 0 {
            (None, 0)
        } else {
            (Some(start), time_util::now_ms().saturating_sub(start) / 1000)
        };
        EngineStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            start_time,
            uptime_seconds,
            subscriptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_zero_before_start() {
        let stats = StatsCollector::new();
        stats.record_received();
        stats.record_published(3);
        stats.record_error();
        let snap = stats.snapshot(BTreeMap::new());
        assert_eq!(snap.uptime_seconds, 0);
        assert!(snap.start_time.is_none());
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.messages_published, 3);
        assert_eq!(snap.errors, 1);

        stats.mark_started();
        assert!(stats.snapshot(BTreeMap::new()).start_time.is_some());
    }
}

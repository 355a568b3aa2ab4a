//! Per-exchange clock-offset tracking.
//!
//! Each venue stamps its frames with its own clock. [`ClockSync`] keeps one
//! offset per exchange so normalizers can express every event time in the
//! local wall-clock domain:
//!
//! ```text
//! unified_ms = exchange_ts_ms + offset_ms      (offset sample available)
//! unified_ms = local now                        (no sample / bad timestamp)
//! ```
//!
//! Offsets are refreshed from outside (see `xfeed_md::clock_source`). A failed
//! refresh leaves the previous offset in place; normalization never waits on
//! a refresh.

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::time_util;
use crate::types::Exchange;

/// Latest offset estimate for one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockOffset {
    /// `local - exchange`, in milliseconds.
    pub offset_ms: i64,
    /// Local time of the last successful sample, `None` until the first sync.
    pub last_sync_at: Option<u64>,
}

/// Shared clock-offset table, one entry per configured exchange.
#[derive(Debug)]
pub struct ClockSync {
    offsets: RwLock<AHashMap<Exchange, ClockOffset>>,
}

impl ClockSync {
    /// Create a table with offset 0 / never-synced for every exchange.
    pub fn new(exchanges: &[Exchange]) -> Self {
        let offsets = exchanges.iter().map(|&e| (e, ClockOffset::default())).collect();
        Self { offsets: RwLock::new(offsets) }
    }

    /// Map an exchange-reported timestamp onto the local clock.
    ///
    /// Falls back to local wall-clock time when `exchange_ts_ms` is missing,
    /// not finite, non-positive, or when no offset sample exists yet.
    pub fn unify(&self, exchange: Exchange, exchange_ts_ms: Option<f64>) -> u64 {
        let now = time_util::now_ms();
        let Some(ts) = exchange_ts_ms.filter(|t| t.is_finite() && *t > 0.0) else {
            return now;
        };
        let offset = match self.offsets.read().get(&exchange) {
            Some(o) if o.last_sync_at.is_some() => o.offset_ms,
            _ => return now,
        };
        let unified = ts + offset as f64;
        if unified.is_finite() && unified > 0.0 { unified as u64 } else { now }
    }

    /// Record a round-trip sample and return the new offset.
    ///
    /// Assumes the server stamped its reply halfway through the round trip.
    pub fn record_sample(
        &self,
        exchange: Exchange,
        local_before_ms: u64,
        server_ms: u64,
        local_after_ms: u64,
    ) -> i64 {
        let midpoint = (local_before_ms as i64 + local_after_ms as i64) / 2;
        let offset = midpoint - server_ms as i64;
        self.set_offset(exchange, offset, local_after_ms);
        offset
    }

    /// Overwrite the offset for `exchange`.
    pub fn set_offset(&self, exchange: Exchange, offset_ms: i64, synced_at: u64) {
        self.offsets
            .write()
            .insert(exchange, ClockOffset { offset_ms, last_sync_at: Some(synced_at) });
    }

    pub fn offset(&self, exchange: Exchange) -> Option<ClockOffset> {
        self.offsets.read().get(&exchange).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_now_without_sample() {
        let clock = ClockSync::new(&[Exchange::Binance]);
        let before = time_util::now_ms();
        let ts = clock.unify(Exchange::Binance, Some(1_000.0));
        assert!(ts >= before);
    }

    #[test]
    fn bad_input_never_exceeds_now() {
        let clock = ClockSync::new(&[Exchange::Okx]);
        clock.set_offset(Exchange::Okx, 5, time_util::now_ms());
        for input in [None, Some(f64::NAN), Some(f64::INFINITY), Some(-3.0)] {
            let ts = clock.unify(Exchange::Okx, input);
            assert!(ts <= time_util::now_ms());
        }
    }

    #[test]
    fn applies_offset_after_sample() {
        let clock = ClockSync::new(&[Exchange::Bybit]);
        let offset = clock.record_sample(Exchange::Bybit, 1_000, 900, 1_100);
        assert_eq!(offset, 150);
        assert_eq!(clock.unify(Exchange::Bybit, Some(2_000.0)), 2_150);
        assert_eq!(clock.offset(Exchange::Bybit).unwrap().last_sync_at, Some(1_100));
    }

    #[test]
    fn offsets_are_per_exchange() {
        let clock = ClockSync::new(&[Exchange::Binance, Exchange::Okx]);
        clock.set_offset(Exchange::Binance, -20, 1);
        assert_eq!(clock.unify(Exchange::Binance, Some(1_000.0)), 980);
        assert_eq!(clock.offset(Exchange::Okx), Some(ClockOffset::default()));
    }
}

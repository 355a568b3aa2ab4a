//! Local book for incremental depth channels (Bybit `orderbook.*`, OKX `books`).
//!
//! These venues send one snapshot per subscription followed by deltas that
//! insert, resize or delete levels (size `0`). Normalizers apply each frame
//! here and publish the resulting full book, so downstream [`Depth`] records
//! are always complete rather than raw deltas.
//!
//! [`Depth`]: xfeed_core::types::Depth

use xfeed_core::types::PriceLevel;

const PRICE_EPS: f64 = 1e-10;

/// Book holding at most `N` levels per side.
///
/// Bids are kept descending, asks ascending, so index 0 is always the best
/// level on either side.
#[derive(Debug, Clone)]
pub struct OrderBook<const N: usize> {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

impl<const N: usize> OrderBook<N> {
    pub fn new() -> Self {
        Self { bids: Vec::with_capacity(N), asks: Vec::with_capacity(N) }
    }

    /// Replace both sides with the venue's levels, kept in received
    /// (best-first) order. Zero-size levels are dropped.
    pub fn set_snapshot(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.bids = snapshot_side(bids, N);
        self.asks = snapshot_side(asks, N);
    }

    /// Apply a delta: size `0` removes the level, otherwise insert or resize.
    pub fn update(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        for level in bids {
            apply(&mut self.bids, *level, N, |existing, new| existing < new);
        }
        for level in asks {
            apply(&mut self.asks, *level, N, |existing, new| existing > new);
        }
    }

    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

impl<const N: usize> Default for OrderBook<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_side(levels: &[PriceLevel], max_levels: usize) -> Vec<PriceLevel> {
    levels.iter().filter(|l| l.size > 0.0).take(max_levels).copied().collect()
}

/// `worse(existing, new)` is true when `new` should sit in front of `existing`.
fn apply(levels: &mut Vec<PriceLevel>, level: PriceLevel, max_levels: usize, worse: impl Fn(f64, f64) -> bool) {
    if let Some(idx) = levels.iter().position(|l| (l.price - level.price).abs() < PRICE_EPS) {
        if level.size == 0.0 {
            levels.remove(idx);
        } else {
            levels[idx].size = level.size;
        }
        return;
    }
    if level.size <= 0.0 {
        return;
    }
    let pos = levels.iter().position(|l| worse(l.price, level.price)).unwrap_or(levels.len());
    levels.insert(pos, level);
    levels.truncate(max_levels);
}

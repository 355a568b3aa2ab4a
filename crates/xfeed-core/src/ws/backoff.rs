//! Exponential reconnect backoff.
//!
//! Retry *k* (1-based) waits `min(base * 2^(k-1), max)`. After `N` consecutive
//! failures the next delay is therefore `min(base * 2^N, max)` once the first
//! retry has consumed the `2^0` slot.

use std::time::Duration;

/// Backoff state for one connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    /// Retries handed out since the last reset.
    attempt: u32,
    /// `0` = unlimited.
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self { base, max, attempt: 0, max_attempts }
    }

    /// Delay for the retry that follows `failures` consecutive failures
    /// (exponent `failures`), capped at `max`.
    pub fn delay_for(base: Duration, max: Duration, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        base.checked_mul(factor).unwrap_or(max).min(max)
    }

    /// Hand out the next retry delay, or `None` if the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        let delay = Self::delay_for(self.base, self.max, self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Retries handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        self.max_attempts > 0 && self.attempt >= self.max_attempts
    }

    /// Called on every successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_and_caps() {
        let b = Duration::from_millis(100);
        let c = Duration::from_millis(1_000);
        let mut backoff = Backoff::new(b, c, 0);
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().unwrap().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn formula_matches_failure_count() {
        let b = Duration::from_millis(250);
        let c = Duration::from_secs(30);
        for n in 0..12u32 {
            let expected = (b * 2u32.pow(n)).min(c);
            assert_eq!(Backoff::delay_for(b, c, n), expected);
        }
        assert_eq!(Backoff::delay_for(b, c, 64), c);
    }

    #[test]
    fn attempt_budget_and_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50), 2);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.exhausted());
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }
}

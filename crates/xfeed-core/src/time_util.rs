//! Wall-clock helpers.
//!
//! All engine timestamps are milliseconds since the Unix epoch. A system clock
//! set before 1970 yields `0` rather than panicking.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Interval spelling → length in milliseconds (`1m`, `15m`, `1h`, `4h`, `1d`, `1w`).
///
/// Zero-length and overflowing intervals are `None`.
pub fn interval_ms(interval: &str) -> Option<u64> {
    let split = interval.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = interval.split_at(split);
    let count: u64 = count.parse().ok()?;
    let unit_ms = match unit {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return None,
    };
    count.checked_mul(unit_ms).filter(|&ms| ms > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn interval_lengths() {
        assert_eq!(interval_ms("1h"), Some(3_600_000));
        assert_eq!(interval_ms("15m"), Some(900_000));
        assert_eq!(interval_ms("1d"), Some(86_400_000));
        assert_eq!(interval_ms("h"), None);
        assert_eq!(interval_ms("1y"), None);
        assert_eq!(interval_ms("0h"), None);
        assert_eq!(interval_ms("99999999999999999999h"), None);
        assert_eq!(interval_ms("18446744073709551615w"), None);
    }
}

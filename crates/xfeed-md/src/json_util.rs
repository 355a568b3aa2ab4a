//! Shared JSON parsing helpers used by all exchange normalizers.
//!
//! Venues encode numbers either as JSON strings (`"30000.5"`) or native
//! numbers. Every helper here accepts both and rejects anything that does not
//! end up as a finite `f64`.

use xfeed_core::types::PriceLevel;

/// Parse a JSON value (string or number) as a finite `f64`.
#[inline]
pub fn parse_str_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    let n = if let Some(s) = v.as_str() {
        fast_float2::parse::<f64, _>(s.trim()).ok()?
    } else {
        v.as_f64()?
    };
    n.is_finite().then_some(n)
}

/// Parse a JSON value (string or number) as `u64`.
#[inline]
pub fn parse_str_u64(v: Option<&serde_json::Value>) -> Option<u64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        s.parse().ok()
    } else {
        v.as_u64()
    }
}

/// Parse a named field on a JSON object as a finite `f64`.
#[inline]
pub fn parse_f64_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    parse_str_f64(v.get(key))
}

/// Field that some venues omit on some channels.
///
/// Absent (or JSON `null` / empty string) yields `Some(0.0)`; present but
/// malformed yields `None` so the whole record is rejected.
#[inline]
pub fn parse_optional_f64(v: &serde_json::Value, key: &str) -> Option<f64> {
    match v.get(key) {
        None | Some(serde_json::Value::Null) => Some(0.0),
        Some(serde_json::Value::String(s)) if s.is_empty() => Some(0.0),
        other => parse_str_f64(other),
    }
}

/// Truly optional numeric field: absent or empty means `Ok(None)`, malformed
/// means `Err(())` so the caller can reject the record.
#[inline]
pub fn parse_maybe_f64(v: &serde_json::Value, key: &str) -> Result<Option<f64>, ()> {
    match v.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(None),
        other => parse_str_f64(other).map(Some).ok_or(()),
    }
}

/// Exchange timestamp in milliseconds as `f64`, for `ClockSync::unify`.
#[inline]
pub fn parse_ts(v: Option<&serde_json::Value>) -> Option<f64> {
    parse_str_f64(v)
}

/// Parse `[["price", "size", ...], ...]` into levels, keeping received order.
///
/// Returns `None` if any level is malformed.
pub fn parse_levels(v: Option<&serde_json::Value>) -> Option<Vec<PriceLevel>> {
    let arr = v?.as_array()?;
    arr.iter()
        .map(|level| {
            let a = level.as_array()?;
            Some(PriceLevel { price: parse_str_f64(a.first())?, size: parse_str_f64(a.get(1))? })
        })
        .collect()
}

/// A JSON `true`/`false`, or the strings `"true"`/`"false"`, or `0`/`1`.
pub fn parse_bool(v: Option<&serde_json::Value>) -> Option<bool> {
    match v? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        serde_json::Value::Number(n) => n.as_u64().map(|n| n != 0),
        _ => None,
    }
}

/// Trade ids arrive as strings or integers depending on venue.
pub fn parse_id(v: Option<&serde_json::Value>) -> Option<String> {
    match v? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `last - open` and the percentage move, guarding against a zero open.
pub fn change_from_open(last: f64, open: f64) -> (f64, f64) {
    let change = last - open;
    let pct = if open != 0.0 { change / open * 100.0 } else { 0.0 };
    (change, pct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_and_strings() {
        assert_eq!(parse_str_f64(Some(&json!("30000.5"))), Some(30000.5));
        assert_eq!(parse_str_f64(Some(&json!(12))), Some(12.0));
        assert_eq!(parse_str_f64(Some(&json!("abc"))), None);
        assert_eq!(parse_str_f64(Some(&json!("inf"))), None);
        assert_eq!(parse_str_f64(Some(&json!("NaN"))), None);
        assert_eq!(parse_str_f64(None), None);
    }

    #[test]
    fn optional_fields() {
        let v = json!({"a": "1.5", "b": "", "c": "x"});
        assert_eq!(parse_optional_f64(&v, "a"), Some(1.5));
        assert_eq!(parse_optional_f64(&v, "b"), Some(0.0));
        assert_eq!(parse_optional_f64(&v, "missing"), Some(0.0));
        assert_eq!(parse_optional_f64(&v, "c"), None);
        assert_eq!(parse_maybe_f64(&v, "missing"), Ok(None));
        assert_eq!(parse_maybe_f64(&v, "a"), Ok(Some(1.5)));
        assert!(parse_maybe_f64(&v, "c").is_err());
    }

    #[test]
    fn levels_keep_order_and_reject_garbage() {
        let levels = parse_levels(Some(&json!([["2", "1"], ["1", "3", "0", "4"]]))).unwrap();
        assert_eq!(levels[0], PriceLevel { price: 2.0, size: 1.0 });
        assert_eq!(levels[1], PriceLevel { price: 1.0, size: 3.0 });
        assert!(parse_levels(Some(&json!([["2", "oops"]]))).is_none());
        assert_eq!(parse_levels(Some(&json!([]))), Some(vec![]));
    }

    #[test]
    fn ids_and_bools() {
        assert_eq!(parse_id(Some(&json!(42))), Some("42".to_string()));
        assert_eq!(parse_id(Some(&json!(""))), None);
        assert_eq!(parse_bool(Some(&json!("1"))), Some(true));
        assert_eq!(parse_bool(Some(&json!(false))), Some(false));
        assert_eq!(change_from_open(110.0, 100.0), (10.0, 10.0));
        assert_eq!(change_from_open(1.0, 0.0), (1.0, 0.0));
    }
}

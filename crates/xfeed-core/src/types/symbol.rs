//! Symbol translation between canonical `BASE/QUOTE` and venue spellings.
//!
//! - Binance / Bybit: unseparated uppercase (`BTCUSDT`). Market type is
//!   encoded by the endpoint, never by the symbol.
//! - OKX: dash-separated (`BTC-USDT`), with a `-SWAP` suffix on perpetuals.
//!
//! Translation never fails: input that cannot be parsed comes back unchanged.

use super::enums::{Exchange, MarketType};

/// Quote currencies tried in priority order when splitting a concatenated
/// symbol. Longer stablecoin tickers come before the assets they end with.
pub const QUOTE_SUFFIXES: &[&str] =
    &["USDT", "USDC", "BUSD", "FDUSD", "TUSD", "DAI", "BTC", "ETH", "BNB", "EUR", "TRY", "USD"];

const OKX_MARKET_SUFFIXES: &[&str] = &["-SWAP", "-FUTURES"];

/// Convert a venue instrument id to canonical `BASE/QUOTE`.
pub fn to_canonical(exchange: Exchange, native: &str) -> String {
    match exchange {
        Exchange::Binance | Exchange::Bybit => split_concatenated(native),
        Exchange::Okx => {
            let upper = native.to_ascii_uppercase();
            let trimmed = OKX_MARKET_SUFFIXES
                .iter()
                .find_map(|suffix| upper.strip_suffix(suffix))
                .unwrap_or(upper.as_str());
            if trimmed.contains('-') {
                trimmed.replace('-', "/")
            } else {
                native.to_string()
            }
        }
    }
}

/// Convert a canonical symbol to the instrument id used on the wire.
pub fn to_native(exchange: Exchange, market: MarketType, canonical: &str) -> String {
    let Some((base, quote)) = canonical.split_once('/') else {
        return canonical.to_string();
    };
    let base = base.to_ascii_uppercase();
    let quote = quote.to_ascii_uppercase();
    match (exchange, market) {
        (Exchange::Binance | Exchange::Bybit, _) => format!("{base}{quote}"),
        (Exchange::Okx, MarketType::Spot) => format!("{base}-{quote}"),
        (Exchange::Okx, MarketType::Futures) => format!("{base}-{quote}-SWAP"),
    }
}

/// Returns `true` if `symbol` is in canonical `BASE/QUOTE` form.
pub fn is_canonical(symbol: &str) -> bool {
    match symbol.split_once('/') {
        Some((base, quote)) => !base.is_empty() && !quote.is_empty() && !quote.contains('/'),
        None => false,
    }
}

fn split_concatenated(native: &str) -> String {
    let upper = native.to_ascii_uppercase();
    for quote in QUOTE_SUFFIXES {
        if let Some(base) = upper.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{base}/{quote}");
            }
        }
    }
    native.to_string()
}

//! Typed error definitions for the xfeed engine.
//!
//! Provides [`FeedError`] for domain-specific errors that callers need to
//! match on (configuration mistakes, rejected subscriptions). Transport and
//! I/O failures travel as `anyhow::Error` and are recovered locally by the
//! connection tasks.

use thiserror::Error;

use crate::types::{DataType, Exchange, MarketType};

/// Domain-specific errors for the xfeed engine.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Exchange name that the engine has no protocol support for.
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    /// Exchange is supported but was not part of the engine configuration.
    #[error("exchange not configured: {0}")]
    ExchangeNotConfigured(Exchange),

    /// The exchange has no stream for this data type on this market.
    #[error("{exchange} ({market}) does not support {data_type} streams")]
    UnsupportedDataType { exchange: Exchange, market: MarketType, data_type: DataType },

    /// Unknown data type name.
    #[error("unknown data type: {0}")]
    UnknownDataType(String),

    /// Engine lifecycle misuse (e.g. starting twice).
    #[error("engine error: {0}")]
    Engine(String),
}

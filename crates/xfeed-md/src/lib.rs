//! # xfeed-md
//!
//! Multi-exchange market-data ingestion for Binance, Bybit and OKX.
//!
//! ## Architecture
//!
//! [`engine::FeedEngine`] owns one connection task per exchange. Each task
//! keeps a WebSocket session alive, replays the desired subscriptions from
//! [`subscription::SubscriptionRegistry`] on every (re)connect and hands raw
//! frames to the exchange's [`normalizer::Normalizer`]. Normalized records are
//! cached in [`cache::MarketCache`] and fanned out by [`publish::Publisher`].
//!
//! ## Exchanges
//!
//! - [`binance`]: raw `/ws` streams, `method: SUBSCRIBE`
//! - [`bybit`]: v5 public topics, delta-merged tickers and books
//! - [`okx`]: v5 public channels, incremental `books`
//!
//! ## Shared infrastructure
//!
//! - [`registry`]: per-exchange URL, ping and subscribe-payload dispatch
//! - [`json_util`]: string-or-number field parsing
//! - [`order_book`]: bounded local book for delta feeds
//! - [`clock_source`]: server-time sampling
//! - [`stats`]: engine counters

pub mod binance;
mod bounded;
pub mod bybit;
pub mod cache;
pub mod clock_source;
pub mod connection;
pub mod engine;
pub mod json_util;
pub mod normalizer;
pub mod okx;
pub mod order_book;
pub mod publish;
pub mod registry;
pub mod stats;
pub mod subscription;

pub use engine::FeedEngine;

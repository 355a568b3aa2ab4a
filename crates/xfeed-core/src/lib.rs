//! # xfeed-core
//!
//! Core crate for the xfeed market-data engine, providing:
//!
//! - **Types** (`types`): enums, canonical records, symbol translation
//! - **Clock** (`clock`): per-exchange clock-offset tracking
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): domain-specific `FeedError` via thiserror
//! - **WebSocket** (`ws`): transport connect, ping payloads, backoff
//! - **Time utilities** (`time_util`): wall-clock timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;

//! WebSocket transport and reconnect backoff.

pub mod backoff;
pub mod client;

pub use backoff::Backoff;
pub use client::{PingPayload, WsStream, connect_ws};

//! WebSocket transport helpers shared by every exchange session.
//!
//! The connection state machine lives in `xfeed_md::connection`; this module
//! only knows how to open a socket and how each venue expects to be pinged.

use std::collections::HashMap;
use std::time::Duration;

use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

/// A connected client socket (plain or TLS).
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Ping payload format: varies by exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum PingPayload {
    /// Send a text frame (e.g. OKX sends `"ping"`).
    Text(String),
    /// Send a JSON object as text (e.g. Bybit `{"op":"ping"}`).
    Json(serde_json::Value),
    /// Use the standard WebSocket ping frame.
    WebSocketPing,
}

impl PingPayload {
    /// Build the frame to put on the wire.
    pub fn to_message(&self) -> Message {
        match self {
            Self::Text(t) => Message::Text(t.clone().into()),
            Self::Json(j) => Message::Text(j.to_string().into()),
            Self::WebSocketPing => Message::Ping(Vec::new().into()),
        }
    }
}

/// Open a WebSocket connection, failing after `timeout`.
///
/// `extra_headers` are added to the handshake request (API keys, gateway
/// routing headers).
pub async fn connect_ws(
    url: &str,
    extra_headers: &HashMap<String, String>,
    timeout: Duration,
) -> anyhow::Result<WsStream> {
    let mut request = url.into_client_request()?;
    for (key, value) in extra_headers {
        request
            .headers_mut()
            .insert(HeaderName::from_bytes(key.as_bytes())?, HeaderValue::from_str(value)?);
    }

    let (stream, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| anyhow::anyhow!("connect to {} timed out after {timeout:?}", host_of(url)))??;
    Ok(stream)
}

/// Extract the host from a URL string (for log lines).
pub fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("").to_string())
        .unwrap_or_default()
}

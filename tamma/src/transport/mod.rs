//! Message transports for MCP servers: stdio subprocess, server-sent events,
//! and WebSocket, behind one send/receive/close contract.
//!
//! Messages are opaque JSON objects; framing is per transport (newline-
//! delimited JSON on stdio, `data:` lines on SSE, text frames on WebSocket).
//! Backpressure is not applied here; the JSON-RPC layer polices outstanding
//! request counts.

mod sse;
mod stdio;
mod websocket;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ErrorCategory;

/// Which carrier a connection uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
    Websocket,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Sse => f.write_str("sse"),
            TransportKind::Websocket => f.write_str("websocket"),
        }
    }
}

/// Inbound event from a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete framed JSON message.
    Message(Value),
    /// A carrier-level error; the connection may still close afterwards.
    Error(String),
    /// The carrier is gone. Terminal; no events follow.
    Closed,
}

/// Errors from transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport not connected")]
    NotConnected,
    #[error("sse endpoint returned status {0}")]
    SseStatus(u16),
}

impl TransportError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransportError::Spawn { .. }
            | TransportError::Io(_)
            | TransportError::Http(_)
            | TransportError::WebSocket(_)
            | TransportError::SseStatus(_) => ErrorCategory::Transient,
            TransportError::Serialize(_) | TransportError::NotConnected => {
                ErrorCategory::Protocol
            }
        }
    }
}

/// Uniform carrier contract. `connect` hands back the event stream; `send`
/// writes one framed JSON message; `close` tears the carrier down and makes
/// the stream emit [`TransportEvent::Closed`].
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    async fn send(&self, message: &Value) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Buffer size for transport event channels. Large enough that a slow reader
/// never stalls the carrier task under normal request volumes.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

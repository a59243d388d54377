//! WebSocket transport: framed JSON as text frames over tokio-tungstenite.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::warn;

use super::{Transport, TransportError, TransportEvent, TransportKind, EVENT_CHANNEL_CAPACITY};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Text-frame JSON carrier over a WebSocket connection.
pub struct WebSocketTransport {
    url: String,
    sink: Option<Mutex<WsSink>>,
    reader: Option<tokio::task::JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sink: None,
            reader: None,
        }
    }

    async fn read_loop(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<TransportEvent>) {
        while let Some(item) = stream.next().await {
            match item {
                Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => {
                        if tx.send(TransportEvent::Message(value)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "non-JSON websocket text frame");
                        let _ = tx
                            .send(TransportEvent::Error(format!("invalid JSON: {e}")))
                            .await;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // ping/pong/binary: ignored
                Err(e) => {
                    let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
            }
        }
        let _ = tx.send(TransportEvent::Closed).await;
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let (stream, _response) = connect_async(self.url.as_str()).await?;
        let (sink, read) = stream.split();

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.reader = Some(tokio::spawn(Self::read_loop(read, tx)));
        self.sink = Some(Mutex::new(sink));
        Ok(rx)
    }

    async fn send(&self, message: &Value) -> Result<(), TransportError> {
        let sink = self.sink.as_ref().ok_or(TransportError::NotConnected)?;
        let text = serde_json::to_string(message)?;
        sink.lock().await.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(sink) = self.sink.take() {
            let _ = sink.lock().await.send(Message::Close(None)).await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: sending before connect fails with `NotConnected`.
    #[tokio::test]
    async fn send_before_connect_fails() {
        let transport = WebSocketTransport::new("ws://127.0.0.1:1");
        let err = transport.send(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    /// **Scenario**: connecting to a dead port is a transport error.
    #[tokio::test]
    async fn connect_refused() {
        let mut transport = WebSocketTransport::new("ws://127.0.0.1:9");
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::WebSocket(_) | TransportError::Io(_)
        ));
    }
}

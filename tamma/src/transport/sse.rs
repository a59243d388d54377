//! SSE transport: receive framed JSON over a server-sent-events stream,
//! send by POSTing to the message endpoint.
//!
//! The server may announce its message endpoint with an `endpoint` event
//! before any JSON messages; until then, sends go to the stream URL itself.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use super::{Transport, TransportError, TransportEvent, TransportKind, EVENT_CHANNEL_CAPACITY};

/// One parsed SSE event: optional event name plus joined data lines.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE frame parser. Feed raw chunks; complete events come out.
///
/// Handles `event:` and `data:` fields and the blank-line event boundary;
/// comment lines (leading `:`) and unknown fields are ignored.
#[derive(Default)]
pub(crate) struct SseParser {
    buffer: String,
    current: SseEvent,
}

impl SseParser {
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.current.data.is_empty() || self.current.event.is_some() {
                    events.push(std::mem::take(&mut self.current));
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.current.event = Some(value.to_string()),
                "data" => {
                    if !self.current.data.is_empty() {
                        self.current.data.push('\n');
                    }
                    self.current.data.push_str(value);
                }
                _ => {}
            }
        }
        events
    }
}

/// Server-sent events carrier with HTTP POST for the send direction.
pub struct SseTransport {
    url: String,
    client: reqwest::Client,
    /// POST target; replaced when the server announces an `endpoint` event.
    post_url: Arc<RwLock<String>>,
    reader: Option<tokio::task::JoinHandle<()>>,
    connected: bool,
}

impl SseTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            post_url: Arc::new(RwLock::new(url.clone())),
            url,
            client: reqwest::Client::new(),
            reader: None,
            connected: false,
        }
    }

    /// Resolve a possibly-relative endpoint path against the stream URL.
    fn resolve_endpoint(base: &str, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        let origin = base
            .find("://")
            .and_then(|i| base[i + 3..].find('/').map(|j| &base[..i + 3 + j]))
            .unwrap_or(base);
        format!("{}{}", origin, endpoint)
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .header("accept", "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::SseStatus(response.status().as_u16()));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let post_url = Arc::clone(&self.post_url);
        let base = self.url.clone();
        let reader = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::default();
            while let Some(item) = stream.next().await {
                let chunk = match item {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                for event in parser.push(&chunk) {
                    match event.event.as_deref() {
                        Some("endpoint") => {
                            let resolved = SseTransport::resolve_endpoint(&base, &event.data);
                            debug!(endpoint = %resolved, "sse message endpoint announced");
                            *post_url.write().await = resolved;
                        }
                        _ => match serde_json::from_str::<Value>(&event.data) {
                            Ok(value) => {
                                if tx.send(TransportEvent::Message(value)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "non-JSON SSE data frame");
                                let _ = tx
                                    .send(TransportEvent::Error(format!("invalid JSON: {e}")))
                                    .await;
                            }
                        },
                    }
                }
            }
            let _ = tx.send(TransportEvent::Closed).await;
        });

        self.reader = Some(reader);
        self.connected = true;
        Ok(rx)
    }

    async fn send(&self, message: &Value) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let url = self.post_url.read().await.clone();
        let response = self.client.post(&url).json(message).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::SseStatus(response.status().as_u16()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: data lines split across chunks assemble into one event.
    #[test]
    fn parser_reassembles_split_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push("data: {\"a\":").is_empty());
        let events = parser.push(" 1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\": 1}");
        assert_eq!(events[0].event, None);
    }

    /// **Scenario**: named events carry their event field.
    #[test]
    fn parser_reads_event_name() {
        let mut parser = SseParser::default();
        let events = parser.push("event: endpoint\ndata: /messages?session=1\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("endpoint"));
        assert_eq!(events[0].data, "/messages?session=1");
    }

    /// **Scenario**: multi-line data joins with newlines; comments skipped.
    #[test]
    fn parser_joins_data_lines() {
        let mut parser = SseParser::default();
        let events = parser.push(": keepalive\ndata: line1\ndata: line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
    }

    /// **Scenario**: relative endpoint resolves against the stream origin.
    #[test]
    fn endpoint_resolution() {
        assert_eq!(
            SseTransport::resolve_endpoint("http://localhost:3000/sse", "/messages"),
            "http://localhost:3000/messages"
        );
        assert_eq!(
            SseTransport::resolve_endpoint("http://h/sse", "https://other/m"),
            "https://other/m"
        );
    }

    /// **Scenario**: sending before connect fails with `NotConnected`.
    #[tokio::test]
    async fn send_before_connect_fails() {
        let transport = SseTransport::new("http://localhost:1/sse");
        let err = transport.send(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}

//! JSON-RPC 2.0 multiplexing: id generation, waiter table, timeouts.
//!
//! One [`RequestTable`] per connection correlates outgoing requests with
//! incoming responses. For every request exactly one of three things resolves
//! its waiter: the matching response, the per-request timeout, or connection
//! close. Notifications (no id) are classified separately and dispatched by
//! the connection.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCategory;
use crate::transport::{Transport, TransportError};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error object: `{code, message, data?}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Errors from JSON-RPC calls.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("request timed out after {timeout_ms}ms: {server} {method}")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },
    #[error("connection closed with request in flight")]
    ConnectionClosed,
    #[error("server error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cancelled")]
    Cancelled,
}

impl RpcError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RpcError::Timeout { .. } | RpcError::ConnectionClosed => ErrorCategory::Transient,
            RpcError::Remote { .. } => ErrorCategory::Protocol,
            RpcError::Transport(e) => e.category(),
            RpcError::Cancelled => ErrorCategory::Cancelled,
        }
    }

    fn from_error_object(obj: ErrorObject) -> Self {
        RpcError::Remote {
            code: obj.code,
            message: obj.message,
        }
    }
}

/// An inbound message, classified by shape.
#[derive(Debug)]
pub enum Incoming {
    /// Response to one of our requests.
    Response {
        id: i64,
        result: Result<Value, ErrorObject>,
    },
    /// Server-initiated notification (no id).
    Notification { method: String, params: Value },
    /// Server-initiated request expecting an answer (e.g. `roots/list`).
    Request {
        id: Value,
        method: String,
        params: Value,
    },
}

/// Classifies a raw JSON value into an [`Incoming`] message. Returns `None`
/// for shapes that are not JSON-RPC at all; those are ignored silently.
pub fn classify(value: &Value) -> Option<Incoming> {
    let obj = value.as_object()?;
    if let Some(method) = obj.get("method").and_then(Value::as_str) {
        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        return match obj.get("id") {
            Some(id) if !id.is_null() => Some(Incoming::Request {
                id: id.clone(),
                method: method.to_string(),
                params,
            }),
            _ => Some(Incoming::Notification {
                method: method.to_string(),
                params,
            }),
        };
    }
    let id = obj.get("id")?.as_i64()?;
    if let Some(error) = obj.get("error") {
        let err: ErrorObject = serde_json::from_value(error.clone()).ok()?;
        return Some(Incoming::Response {
            id,
            result: Err(err),
        });
    }
    let result = obj.get("result").cloned().unwrap_or(Value::Null);
    Some(Incoming::Response {
        id,
        result: Ok(result),
    })
}

type Waiter = oneshot::Sender<Result<Value, RpcError>>;

/// Pending-request table: monotonic ids mapped to response waiters.
///
/// Mutated only through its own methods; safe to share behind `Arc`.
pub struct RequestTable {
    server: String,
    next_id: AtomicI64,
    pending: DashMap<i64, Waiter>,
}

impl RequestTable {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            next_id: AtomicI64::new(1),
            pending: DashMap::new(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Strictly monotonic request id.
    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a waiter for `id` and returns its receiving half.
    pub fn register(&self, id: i64) -> oneshot::Receiver<Result<Value, RpcError>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Removes the waiter for `id` without resolving it (timeout and
    /// cancellation paths).
    pub fn remove(&self, id: i64) {
        self.pending.remove(&id);
    }

    /// Delivers a response to the waiter for `id`. Returns false when no
    /// waiter exists (already timed out, or an id we never issued).
    pub fn resolve(&self, id: i64, result: Result<Value, ErrorObject>) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => tx
                .send(result.map_err(RpcError::from_error_object))
                .is_ok(),
            None => false,
        }
    }

    /// Fails every pending waiter with `ConnectionClosed`.
    pub fn fail_all(&self) {
        let ids: Vec<i64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(RpcError::ConnectionClosed));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Sends one request over `transport` and awaits its response through
/// `table`, with a per-request timeout and cancellation.
pub async fn call(
    transport: &dyn Transport,
    table: &RequestTable,
    method: &str,
    params: Option<Value>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Value, RpcError> {
    let id = table.next_id();
    let rx = table.register(id);

    let mut request = json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
    });
    if let Some(p) = params {
        request["params"] = p;
    }
    if let Err(e) = transport.send(&request).await {
        table.remove(id);
        return Err(e.into());
    }

    tokio::select! {
        _ = cancel.cancelled() => {
            table.remove(id);
            Err(RpcError::Cancelled)
        }
        _ = tokio::time::sleep(timeout) => {
            table.remove(id);
            Err(RpcError::Timeout {
                server: table.server().to_string(),
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
        res = rx => match res {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConnectionClosed),
        }
    }
}

/// Builds a notification value (no id, no response expected).
pub fn notification(method: &str, params: Option<Value>) -> Value {
    let mut msg = json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
    });
    if let Some(p) = params {
        msg["params"] = p;
    }
    msg
}

/// Builds a response to a server-initiated request.
pub fn response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

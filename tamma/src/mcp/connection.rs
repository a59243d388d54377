//! One logical connection to an external MCP tool server.
//!
//! Lifecycle: `disconnected → connecting → connected`, with
//! `reconnecting` on carrier loss when `reconnect_on_error` is set and
//! `error` once the reconnect budget is spent. Initialize handshake and
//! capability discovery run on every (re)connect; discovery is best-effort
//! per list. At most one handshake is in flight per connection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ErrorCategory;
use crate::rpc::{self, classify, Incoming, RequestTable, RpcError};
use crate::transport::{
    SseTransport, StdioTransport, Transport, TransportError, TransportEvent, TransportKind,
    WebSocketTransport,
};

use super::metrics::{ConnectionMetrics, MetricsSnapshot};

/// MCP protocol revision sent during initialize.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const MAX_BACKOFF_SECS: u64 = 30;

/// Errors from MCP connection operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("initialize failed for {server}: {reason}")]
    Initialize { server: String, reason: String },
    #[error("server {0} is not connected")]
    NotConnected(String),
    #[error("unknown server {0}")]
    UnknownServer(String),
    #[error("invalid config for {server}: {reason}")]
    InvalidConfig { server: String, reason: String },
}

impl McpError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            McpError::Rpc(e) => e.category(),
            McpError::Transport(e) => e.category(),
            McpError::Initialize { .. } => ErrorCategory::Protocol,
            McpError::NotConnected(_) => ErrorCategory::Transient,
            McpError::UnknownServer(_) | McpError::InvalidConfig { .. } => {
                ErrorCategory::Configuration
            }
        }
    }
}

/// Declared configuration for one MCP server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: TransportKind,
    /// Command to spawn (stdio only).
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Stream URL (sse and websocket only).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub reconnect_on_error: bool,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,
    #[serde(default)]
    pub sandboxed: bool,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_true() -> bool {
    true
}
fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

/// Connection status as observed between operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// A tool the server exposes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// A resource the server exposes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// A prompt template the server exposes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Builds the concrete carrier for a server config.
pub fn build_transport(config: &McpServerConfig) -> Result<Box<dyn Transport>, McpError> {
    match config.transport {
        TransportKind::Stdio => {
            let command = config.command.clone().ok_or_else(|| McpError::InvalidConfig {
                server: config.name.clone(),
                reason: "stdio transport requires a command".into(),
            })?;
            Ok(Box::new(
                StdioTransport::new(command, config.args.clone()).with_env(config.env.clone()),
            ))
        }
        TransportKind::Sse => {
            let url = config.url.clone().ok_or_else(|| McpError::InvalidConfig {
                server: config.name.clone(),
                reason: "sse transport requires a url".into(),
            })?;
            Ok(Box::new(SseTransport::new(url)))
        }
        TransportKind::Websocket => {
            let url = config.url.clone().ok_or_else(|| McpError::InvalidConfig {
                server: config.name.clone(),
                reason: "websocket transport requires a url".into(),
            })?;
            Ok(Box::new(WebSocketTransport::new(url)))
        }
    }
}

/// Backoff before reconnect attempt `n` (1-based): `min(2^(n−1) s, 30 s)`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(MAX_BACKOFF_SECS)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

fn is_list_changed(method: &str, list: &str) -> bool {
    // Accept both the bare form and the namespaced wire form.
    method == format!("{list}/list_changed") || method.ends_with(&format!("{list}/list_changed"))
}

/// One logical MCP server connection.
pub struct McpConnection {
    config: McpServerConfig,
    table: Arc<RequestTable>,
    transport: RwLock<Option<Box<dyn Transport>>>,
    status: RwLock<ConnectionStatus>,
    capabilities: RwLock<Value>,
    tools: RwLock<Vec<ToolInfo>>,
    resources: RwLock<Vec<ResourceInfo>>,
    prompts: RwLock<Vec<PromptInfo>>,
    metrics: ConnectionMetrics,
    cancel: CancellationToken,
    reconnect_attempts: AtomicU32,
    closing: AtomicBool,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    notification_handlers: dashmap::DashMap<String, NotificationHandler>,
}

type NotificationHandler = Box<dyn Fn(Value) + Send + Sync>;

impl McpConnection {
    pub fn new(config: McpServerConfig) -> Arc<Self> {
        let table = Arc::new(RequestTable::new(config.name.clone()));
        Arc::new(Self {
            table,
            config,
            transport: RwLock::new(None),
            status: RwLock::new(ConnectionStatus::Disconnected),
            capabilities: RwLock::new(Value::Null),
            tools: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
            prompts: RwLock::new(Vec::new()),
            metrics: ConnectionMetrics::new(),
            cancel: CancellationToken::new(),
            reconnect_attempts: AtomicU32::new(0),
            closing: AtomicBool::new(false),
            reader: Mutex::new(None),
            notification_handlers: dashmap::DashMap::new(),
        })
    }

    /// Registers a handler for a notification method. The built-in
    /// `*/list_changed` refresh behaviour runs regardless.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        handler: impl Fn(Value) + Send + Sync + 'static,
    ) {
        self.notification_handlers
            .insert(method.into(), Box::new(handler));
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    pub async fn tools(&self) -> Vec<ToolInfo> {
        self.tools.read().await.clone()
    }

    pub async fn resources(&self) -> Vec<ResourceInfo> {
        self.resources.read().await.clone()
    }

    pub async fn prompts(&self) -> Vec<PromptInfo> {
        self.prompts.read().await.clone()
    }

    pub async fn capabilities(&self) -> Value {
        self.capabilities.read().await.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Connects and completes the initialize handshake plus discovery.
    pub async fn connect(self: &Arc<Self>) -> Result<(), McpError> {
        {
            let mut status = self.status.write().await;
            if matches!(
                *status,
                ConnectionStatus::Connected | ConnectionStatus::Connecting
            ) {
                return Ok(());
            }
            *status = ConnectionStatus::Connecting;
        }
        match self.establish().await {
            Ok(()) => {
                *self.status.write().await = ConnectionStatus::Connected;
                self.reconnect_attempts.store(0, Ordering::Relaxed);
                info!(server = %self.config.name, "mcp server connected");
                Ok(())
            }
            Err(e) => {
                *self.status.write().await = ConnectionStatus::Error;
                Err(e)
            }
        }
    }

    /// Carrier setup + handshake + discovery, shared by connect and reconnect.
    fn establish(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = Result<(), McpError>> + Send + '_>> {
        Box::pin(self.establish_inner())
    }

    async fn establish_inner(self: &Arc<Self>) -> Result<(), McpError> {
        let mut transport = build_transport(&self.config)?;
        let rx = transport.connect().await?;
        *self.transport.write().await = Some(transport);

        let conn = Arc::clone(self);
        let handle = tokio::spawn(async move { conn.read_loop(rx).await });
        *self.reader.lock().await = Some(handle);

        self.handshake().await?;
        self.discover_all().await;
        Ok(())
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
            "clientInfo": {
                "name": "tamma",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = self
            .raw_request("initialize", Some(params))
            .await
            .map_err(|e| McpError::Initialize {
                server: self.config.name.clone(),
                reason: e.to_string(),
            })?;
        *self.capabilities.write().await = result
            .get("capabilities")
            .cloned()
            .unwrap_or(Value::Null);

        self.send_raw(&rpc::notification(
            "notifications/initialized",
            Some(json!({})),
        ))
        .await?;
        Ok(())
    }

    /// Best-effort discovery: an individual list failure leaves that list
    /// empty but does not fail the connection.
    async fn discover_all(&self) {
        if let Err(e) = self.refresh_tools().await {
            warn!(server = %self.config.name, error = %e, "tools discovery failed");
        }
        if let Err(e) = self.refresh_resources().await {
            warn!(server = %self.config.name, error = %e, "resources discovery failed");
        }
        if let Err(e) = self.refresh_prompts().await {
            warn!(server = %self.config.name, error = %e, "prompts discovery failed");
        }
    }

    async fn refresh_tools(&self) -> Result<(), McpError> {
        let result = self.raw_request("tools/list", None).await?;
        let tools: Vec<ToolInfo> = result
            .get("tools")
            .map(|v| serde_json::from_value(v.clone()).unwrap_or_default())
            .unwrap_or_default();
        *self.tools.write().await = tools;
        Ok(())
    }

    async fn refresh_resources(&self) -> Result<(), McpError> {
        let result = self.raw_request("resources/list", None).await?;
        let resources: Vec<ResourceInfo> = result
            .get("resources")
            .map(|v| serde_json::from_value(v.clone()).unwrap_or_default())
            .unwrap_or_default();
        *self.resources.write().await = resources;
        Ok(())
    }

    async fn refresh_prompts(&self) -> Result<(), McpError> {
        let result = self.raw_request("prompts/list", None).await?;
        let prompts: Vec<PromptInfo> = result
            .get("prompts")
            .map(|v| serde_json::from_value(v.clone()).unwrap_or_default())
            .unwrap_or_default();
        *self.prompts.write().await = prompts;
        Ok(())
    }

    /// Sends a request without a status gate (handshake and discovery run
    /// before the connection reports `connected`).
    async fn raw_request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let start = Instant::now();
        let guard = self.transport.read().await;
        let transport = guard
            .as_deref()
            .ok_or_else(|| McpError::NotConnected(self.config.name.clone()))?;
        let result = rpc::call(
            transport,
            &self.table,
            method,
            params,
            Duration::from_millis(self.config.timeout_ms),
            &self.cancel,
        )
        .await;
        drop(guard);
        self.metrics
            .record(result.is_ok(), start.elapsed().as_millis() as u64);
        result.map_err(Into::into)
    }

    async fn send_raw(&self, message: &Value) -> Result<(), McpError> {
        let guard = self.transport.read().await;
        let transport = guard
            .as_deref()
            .ok_or_else(|| McpError::NotConnected(self.config.name.clone()))?;
        transport.send(message).await.map_err(Into::into)
    }

    /// Sends a request; the connection must be `connected`.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.status().await != ConnectionStatus::Connected {
            return Err(McpError::NotConnected(self.config.name.clone()));
        }
        self.raw_request(method, params).await
    }

    /// Invokes a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// Reads a resource body.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.request("resources/read", Some(json!({ "uri": uri })))
            .await
    }

    async fn read_loop(self: Arc<Self>, mut rx: mpsc::Receiver<TransportEvent>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.table.fail_all();
                    return;
                }
                event = rx.recv() => match event {
                    Some(TransportEvent::Message(value)) => self.handle_message(value).await,
                    Some(TransportEvent::Error(e)) => {
                        warn!(server = %self.config.name, error = %e, "transport error");
                    }
                    Some(TransportEvent::Closed) | None => break,
                }
            }
        }

        self.table.fail_all();
        if self.closing.load(Ordering::Relaxed) {
            *self.status.write().await = ConnectionStatus::Disconnected;
            return;
        }
        if self.config.reconnect_on_error {
            self.reconnect().await;
        } else {
            *self.status.write().await = ConnectionStatus::Error;
        }
    }

    async fn reconnect(self: &Arc<Self>) {
        *self.status.write().await = ConnectionStatus::Reconnecting;
        loop {
            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if attempt > self.config.max_reconnect_attempts {
                warn!(server = %self.config.name, "reconnect budget exhausted");
                *self.status.write().await = ConnectionStatus::Error;
                return;
            }
            let delay = backoff_delay(attempt);
            debug!(server = %self.config.name, attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            match self.establish().await {
                Ok(()) => {
                    *self.status.write().await = ConnectionStatus::Connected;
                    self.reconnect_attempts.store(0, Ordering::Relaxed);
                    info!(server = %self.config.name, "mcp server reconnected");
                    return;
                }
                Err(e) => {
                    warn!(server = %self.config.name, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, value: Value) {
        match classify(&value) {
            Some(Incoming::Response { id, result }) => {
                if !self.table.resolve(id, result) {
                    debug!(server = %self.config.name, id, "response for unknown request id");
                }
            }
            Some(Incoming::Notification { method, params }) => {
                if let Some(handler) = self.notification_handlers.get(&method) {
                    handler(params);
                }
                let refresher = if is_list_changed(&method, "tools") {
                    Some(ListKind::Tools)
                } else if is_list_changed(&method, "resources") {
                    Some(ListKind::Resources)
                } else if is_list_changed(&method, "prompts") {
                    Some(ListKind::Prompts)
                } else {
                    None
                };
                if let Some(kind) = refresher {
                    let conn = Arc::clone(self);
                    tokio::spawn(async move {
                        // Refresh failures retain the previous list.
                        let result = match kind {
                            ListKind::Tools => conn.refresh_tools().await,
                            ListKind::Resources => conn.refresh_resources().await,
                            ListKind::Prompts => conn.refresh_prompts().await,
                        };
                        if let Err(e) = result {
                            warn!(server = %conn.config.name, error = %e, "list refresh failed");
                        }
                    });
                }
            }
            Some(Incoming::Request { id, method, .. }) => match method.as_str() {
                "roots/list" => {
                    let _ = self
                        .send_raw(&rpc::response(id, json!({ "roots": [] })))
                        .await;
                }
                "ping" => {
                    let _ = self.send_raw(&rpc::response(id, json!({}))).await;
                }
                _ => {}
            },
            None => {}
        }
    }

    /// Tears the connection down: cancels backoff, fails pending requests,
    /// closes the carrier.
    pub async fn disconnect(&self) {
        self.closing.store(true, Ordering::Relaxed);
        self.cancel.cancel();
        self.table.fail_all();
        if let Some(mut transport) = self.transport.write().await.take() {
            let _ = transport.close().await;
        }
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        *self.status.write().await = ConnectionStatus::Disconnected;
        info!(server = %self.config.name, "mcp server disconnected");
    }
}

enum ListKind {
    Tools,
    Resources,
    Prompts,
}

/// Pulls concatenated text out of a `resources/read` result.
pub fn resource_text(result: &Value) -> String {
    result
        .get("contents")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

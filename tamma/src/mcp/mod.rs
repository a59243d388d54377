//! MCP client: connections to external tool servers over stdio, SSE, or
//! WebSocket, with capability discovery, reconnect, and shared caches.
//!
//! One [`McpConnection`] per configured server; the [`ServerRegistry`] owns
//! them and fronts the TTL capability cache and the byte-bounded resource
//! content cache used by the retrieval layer.

mod caches;
mod connection;
mod metrics;
mod registry;

pub use caches::{CapabilityCache, CapabilitySet, ResourceCache};
pub use connection::{
    backoff_delay, build_transport, resource_text, ConnectionStatus, McpConnection, McpError,
    McpServerConfig, PromptInfo, ResourceInfo, ToolInfo, PROTOCOL_VERSION,
};
pub use metrics::{ConnectionMetrics, MetricsSnapshot};
pub use registry::ServerRegistry;

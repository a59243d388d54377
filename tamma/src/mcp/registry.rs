//! Registry of configured MCP servers with shared caches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::warn;

use super::caches::{CapabilityCache, CapabilitySet, ResourceCache};
use super::connection::{ConnectionStatus, McpConnection, McpError, McpServerConfig};
use super::metrics::MetricsSnapshot;

const DEFAULT_CAPABILITY_TTL: Duration = Duration::from_secs(300);
const DEFAULT_RESOURCE_CACHE_BYTES: usize = 4 * 1024 * 1024;

/// All configured server connections plus the capability and resource caches
/// shared by the retrieval layer.
pub struct ServerRegistry {
    connections: DashMap<String, Arc<McpConnection>>,
    capabilities: CapabilityCache,
    resources: ResourceCache,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPABILITY_TTL, DEFAULT_RESOURCE_CACHE_BYTES)
    }
}

impl ServerRegistry {
    pub fn new(capability_ttl: Duration, resource_cache_bytes: usize) -> Self {
        Self {
            connections: DashMap::new(),
            capabilities: CapabilityCache::new(capability_ttl),
            resources: ResourceCache::new(resource_cache_bytes),
        }
    }

    /// Creates and connects one server. A connect failure still registers the
    /// connection so reconnect/backoff state stays observable.
    pub async fn connect(&self, config: McpServerConfig) -> Result<Arc<McpConnection>, McpError> {
        let name = config.name.clone();
        let conn = McpConnection::new(config);
        self.connections.insert(name, Arc::clone(&conn));
        conn.connect().await?;
        Ok(conn)
    }

    /// Connects every configured server; failures are logged per server and
    /// do not stop the rest.
    pub async fn connect_all(&self, configs: Vec<McpServerConfig>) {
        for config in configs {
            let name = config.name.clone();
            if let Err(e) = self.connect(config).await {
                warn!(server = %name, error = %e, "mcp server connect failed");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<McpConnection>> {
        self.connections.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn all(&self) -> Vec<Arc<McpConnection>> {
        self.connections
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Connections currently in `connected` status.
    pub async fn connected(&self) -> Vec<Arc<McpConnection>> {
        let mut out = Vec::new();
        for conn in self.all() {
            if conn.status().await == ConnectionStatus::Connected {
                out.push(conn);
            }
        }
        out
    }

    /// Capability set for one server, through the TTL cache.
    pub async fn capability_set(&self, name: &str) -> Result<CapabilitySet, McpError> {
        if let Some(cached) = self.capabilities.get(name) {
            return Ok(cached);
        }
        let conn = self
            .get(name)
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))?;
        let set = CapabilitySet {
            tools: conn.tools().await,
            resources: conn.resources().await,
            prompts: conn.prompts().await,
        };
        self.capabilities.put(name, set.clone());
        Ok(set)
    }

    /// Reads a resource through the byte-bounded content cache.
    pub async fn read_resource_cached(
        &self,
        server: &str,
        uri: &str,
    ) -> Result<(String, bool), McpError> {
        let key = format!("{server}::{uri}");
        if let Some(bytes) = self.resources.get(&key) {
            return Ok((String::from_utf8_lossy(&bytes).into_owned(), true));
        }
        let conn = self
            .get(server)
            .ok_or_else(|| McpError::UnknownServer(server.to_string()))?;
        let result = conn.read_resource(uri).await?;
        let text = super::connection::resource_text(&result);
        self.resources.put(&key, text.clone().into_bytes());
        Ok((text, false))
    }

    pub fn metrics(&self) -> HashMap<String, MetricsSnapshot> {
        self.connections
            .iter()
            .map(|e| (e.key().clone(), e.value().metrics()))
            .collect()
    }

    /// Disconnects every server and drops them from the registry.
    pub async fn dispose_all(&self) {
        for conn in self.all() {
            conn.disconnect().await;
        }
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: unknown servers surface `UnknownServer`.
    #[tokio::test]
    async fn unknown_server_errors() {
        let registry = ServerRegistry::default();
        assert!(matches!(
            registry.capability_set("missing").await,
            Err(McpError::UnknownServer(_))
        ));
        assert!(matches!(
            registry.read_resource_cached("missing", "file://x").await,
            Err(McpError::UnknownServer(_))
        ));
    }

    /// **Scenario**: an empty registry reports no connections or metrics.
    #[tokio::test]
    async fn empty_registry() {
        let registry = ServerRegistry::default();
        assert!(registry.all().is_empty());
        assert!(registry.connected().await.is_empty());
        assert!(registry.metrics().is_empty());
    }
}

//! MCP source: wraps resources of connected MCP servers as context chunks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::mcp::ServerRegistry;
use crate::types::{estimate_tokens, ChunkMetadata, ContextChunk, SourceKind};

use super::{ContextSource, Retrieval, SourceError, SourceQuery};

/// Relevance assigned to resource bodies; the ranker re-scores via fusion.
const RESOURCE_RELEVANCE: f32 = 0.5;

pub struct McpResourceSource {
    registry: Arc<ServerRegistry>,
    max_chunks: usize,
}

impl McpResourceSource {
    pub fn new(registry: Arc<ServerRegistry>, max_chunks: usize) -> Self {
        Self {
            registry,
            max_chunks: max_chunks.max(1),
        }
    }
}

#[async_trait]
impl ContextSource for McpResourceSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Mcp
    }

    fn name(&self) -> &str {
        "mcp"
    }

    async fn is_available(&self) -> bool {
        !self.registry.connected().await.is_empty()
    }

    async fn retrieve(&self, query: &SourceQuery) -> Result<Retrieval, SourceError> {
        let limit = self.max_chunks.min(query.max_chunks.max(1));
        let mut chunks = Vec::new();
        let mut all_cached = true;
        let mut fetched_any = false;

        for conn in self.registry.connected().await {
            for resource in conn.resources().await {
                if chunks.len() >= limit {
                    break;
                }
                match self
                    .registry
                    .read_resource_cached(conn.name(), &resource.uri)
                    .await
                {
                    Ok((text, cached)) => {
                        if text.is_empty() {
                            continue;
                        }
                        fetched_any = true;
                        all_cached &= cached;
                        chunks.push(ContextChunk {
                            id: format!("mcp:{}:{}", conn.name(), resource.uri),
                            token_count: estimate_tokens(&text),
                            content: text,
                            source: SourceKind::Mcp,
                            relevance: RESOURCE_RELEVANCE,
                            metadata: ChunkMetadata {
                                url: Some(resource.uri.clone()),
                                ..Default::default()
                            },
                            embedding: None,
                        });
                    }
                    Err(e) => {
                        warn!(server = %conn.name(), uri = %resource.uri, error = %e, "resource read failed");
                    }
                }
            }
        }

        Ok(Retrieval {
            cache_hit: fetched_any && all_cached,
            chunks,
        })
    }
}

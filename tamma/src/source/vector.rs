//! Vector search source: embeds the query and searches an external vector
//! store through the [`VectorStore`] port.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{ChunkMetadata, ContextChunk, SourceKind};

use super::{ContextSource, Retrieval, SourceError, SourceQuery};

/// Embedding provider port. The core never talks to an embedding model
/// directly.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, SourceError>;

    fn dimension(&self) -> usize;
}

/// One hit from the vector store.
#[derive(Clone, Debug)]
pub struct VectorHit {
    pub id: String,
    pub content: String,
    /// Similarity score in `[0, 1]`.
    pub score: f32,
    pub metadata: ChunkMetadata,
    pub embedding: Option<Vec<f32>>,
}

/// Search request against one collection.
#[derive(Clone, Debug)]
pub struct VectorSearchRequest {
    pub embedding: Vec<f32>,
    pub top_k: usize,
    pub score_threshold: Option<f32>,
    pub filter: Option<Value>,
}

/// Vector store port; drivers live outside the core.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        request: VectorSearchRequest,
    ) -> Result<Vec<VectorHit>, SourceError>;

    async fn is_available(&self) -> bool;
}

/// Retrieval source backed by a vector store and an embedder.
pub struct VectorSource {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    score_threshold: Option<f32>,
}

impl VectorSource {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            collection: collection.into(),
            score_threshold: None,
        }
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    fn filter_value(query: &SourceQuery) -> Option<Value> {
        let filters = &query.filters;
        if filters.file_paths.is_empty()
            && filters.languages.is_empty()
            && filters.modified_after.is_none()
        {
            return None;
        }
        let mut filter = serde_json::Map::new();
        if !filters.file_paths.is_empty() {
            filter.insert("file_paths".into(), serde_json::json!(filters.file_paths));
        }
        if !filters.languages.is_empty() {
            filter.insert("languages".into(), serde_json::json!(filters.languages));
        }
        if let Some(after) = filters.modified_after {
            filter.insert("modified_after".into(), serde_json::json!(after));
        }
        Some(Value::Object(filter))
    }
}

#[async_trait]
impl ContextSource for VectorSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Vector
    }

    fn name(&self) -> &str {
        "vector"
    }

    async fn is_available(&self) -> bool {
        self.store.is_available().await
    }

    async fn retrieve(&self, query: &SourceQuery) -> Result<Retrieval, SourceError> {
        // Use the caller's embedding when present; embed the text otherwise.
        let embedding = match &query.embedding {
            Some(e) => e.clone(),
            None => {
                let mut vectors = self.embedder.embed(&[query.text.as_str()]).await?;
                vectors
                    .pop()
                    .ok_or_else(|| SourceError::Embedding("no vector returned".into()))?
            }
        };

        let hits = self
            .store
            .search(
                &self.collection,
                VectorSearchRequest {
                    embedding,
                    top_k: query.max_chunks,
                    score_threshold: self.score_threshold,
                    filter: Self::filter_value(query),
                },
            )
            .await?;

        let chunks = hits
            .into_iter()
            .map(|hit| ContextChunk {
                token_count: crate::types::estimate_tokens(&hit.content),
                id: hit.id,
                content: hit.content,
                source: SourceKind::Vector,
                relevance: hit.score.clamp(0.0, 1.0),
                metadata: hit.metadata,
                embedding: hit.embedding,
            })
            .collect();
        Ok(Retrieval {
            chunks,
            cache_hit: false,
        })
    }
}

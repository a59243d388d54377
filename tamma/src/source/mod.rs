//! Retrieval sources: one uniform contract, four concrete adaptors.
//!
//! Shared behaviour (timing, error capture, timeout) lives in
//! [`timed_retrieve`] rather than a base class; sources implement only the
//! operation-specific logic.

mod keyword;
mod mcp_source;
mod rag_source;
mod vector;

pub use keyword::{tokenize, KeywordDocument, KeywordIndex, KeywordSource};
pub use mcp_source::McpResourceSource;
pub use rag_source::RagSource;
pub use vector::{Embedder, VectorHit, VectorSearchRequest, VectorSource, VectorStore};

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ErrorCategory;
use crate::mcp::McpError;
use crate::types::{ContextChunk, SourceContribution, SourceKind};

/// Errors from source retrieval.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("embedding: {0}")]
    Embedding(String),
    #[error("store: {0}")]
    Store(String),
    #[error(transparent)]
    Mcp(#[from] McpError),
    #[error("retrieval timed out after {0}ms")]
    Timeout(u64),
    #[error("cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SourceError::Unavailable(_) | SourceError::Timeout(_) => ErrorCategory::Transient,
            SourceError::Embedding(_) | SourceError::Store(_) => ErrorCategory::Transient,
            SourceError::Mcp(e) => e.category(),
            SourceError::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// Metadata filters applied where the source supports them.
#[derive(Clone, Debug, Default)]
pub struct QueryFilters {
    pub file_paths: Vec<String>,
    pub languages: Vec<String>,
    pub modified_after: Option<DateTime<Utc>>,
}

/// What a source gets asked.
#[derive(Clone, Debug)]
pub struct SourceQuery {
    pub text: String,
    /// Expansion variants OR-joined into keyword term sets.
    pub expanded_terms: Vec<String>,
    /// Query embedding, when the caller computed one.
    pub embedding: Option<Vec<f32>>,
    pub max_chunks: usize,
    pub token_budget: usize,
    pub filters: QueryFilters,
}

impl SourceQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expanded_terms: Vec::new(),
            embedding: None,
            max_chunks: 20,
            token_budget: usize::MAX,
            filters: QueryFilters::default(),
        }
    }
}

/// What a source hands back before timing wraps it.
#[derive(Clone, Debug, Default)]
pub struct Retrieval {
    pub chunks: Vec<ContextChunk>,
    pub cache_hit: bool,
}

/// One source's contribution including timing and captured error.
#[derive(Clone, Debug)]
pub struct SourceResult {
    pub source: SourceKind,
    pub chunks: Vec<ContextChunk>,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub error: Option<String>,
}

impl SourceResult {
    pub fn contribution(&self) -> SourceContribution {
        SourceContribution {
            source: self.source,
            chunks: self.chunks.len(),
            latency_ms: self.latency_ms,
            cache_hit: self.cache_hit,
            error: self.error.clone(),
        }
    }
}

/// Uniform retrieval contract.
#[async_trait]
pub trait ContextSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn is_available(&self) -> bool;

    async fn retrieve(&self, query: &SourceQuery) -> Result<Retrieval, SourceError>;

    async fn dispose(&self) {}
}

/// Runs one retrieval with timing, timeout, and error capture. A failure
/// becomes a populated `error` on the result, never a panic or abort; the
/// aggregator's settle-all fan-out builds on this.
pub async fn timed_retrieve(
    source: &dyn ContextSource,
    query: &SourceQuery,
    timeout: Duration,
) -> SourceResult {
    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, source.retrieve(query)).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(Ok(retrieval)) => SourceResult {
            source: source.kind(),
            chunks: retrieval.chunks,
            latency_ms,
            cache_hit: retrieval.cache_hit,
            error: None,
        },
        Ok(Err(e)) => SourceResult {
            source: source.kind(),
            chunks: Vec::new(),
            latency_ms,
            cache_hit: false,
            error: Some(e.to_string()),
        },
        Err(_) => SourceResult {
            source: source.kind(),
            chunks: Vec::new(),
            latency_ms,
            cache_hit: false,
            error: Some(SourceError::Timeout(timeout.as_millis() as u64).to_string()),
        },
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::ChunkMetadata;

    /// Source returning canned chunks, or failing, or hanging.
    pub struct MockSource {
        pub kind: SourceKind,
        pub chunks: Vec<ContextChunk>,
        pub fail: bool,
        pub delay: Option<Duration>,
    }

    impl MockSource {
        pub fn with_chunks(kind: SourceKind, chunks: Vec<ContextChunk>) -> Self {
            Self {
                kind,
                chunks,
                fail: false,
                delay: None,
            }
        }

        pub fn failing(kind: SourceKind) -> Self {
            Self {
                kind,
                chunks: Vec::new(),
                fail: true,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl ContextSource for MockSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }
        fn name(&self) -> &str {
            "mock"
        }
        async fn is_available(&self) -> bool {
            !self.fail
        }
        async fn retrieve(&self, _query: &SourceQuery) -> Result<Retrieval, SourceError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(SourceError::Unavailable("mock down".into()));
            }
            Ok(Retrieval {
                chunks: self.chunks.clone(),
                cache_hit: false,
            })
        }
    }

    pub fn chunk(id: &str, source: SourceKind, relevance: f32, content: &str) -> ContextChunk {
        ContextChunk {
            id: id.to_string(),
            content: content.to_string(),
            source,
            relevance,
            token_count: crate::types::estimate_tokens(content),
            metadata: ChunkMetadata::default(),
            embedding: None,
        }
    }
}

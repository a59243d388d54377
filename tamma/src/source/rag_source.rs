//! RAG source: thin adaptor exposing the pipeline through the uniform
//! source contract.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::rag::RagPipeline;
use crate::types::{ContextChunk, SourceKind};

use super::{ContextSource, Retrieval, SourceError, SourceQuery};

pub struct RagSource {
    pipeline: Arc<RagPipeline>,
}

impl RagSource {
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ContextSource for RagSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Rag
    }

    fn name(&self) -> &str {
        "rag"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn retrieve(&self, query: &SourceQuery) -> Result<Retrieval, SourceError> {
        let cancel = CancellationToken::new();
        let result = self
            .pipeline
            .retrieve(&query.text, query.max_chunks, &cancel)
            .await?;

        // Re-tag so downstream dedup sees one producing source, and fold the
        // fused score back into relevance (normalized against the best).
        let best = result
            .chunks
            .first()
            .map(|c| c.effective_score())
            .filter(|s| *s > 0.0)
            .unwrap_or(1.0);
        let chunks: Vec<ContextChunk> = result
            .chunks
            .into_iter()
            .map(|retrieved| {
                let relevance = (retrieved.effective_score() / best).clamp(0.0, 1.0);
                let mut chunk = retrieved.chunk;
                chunk.source = SourceKind::Rag;
                chunk.relevance = relevance;
                chunk
            })
            .collect();

        Ok(Retrieval {
            chunks,
            cache_hit: result.cache_hit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::RagConfig;
    use crate::source::test_support::{chunk, MockSource};

    /// **Scenario**: pipeline output surfaces as rag-tagged chunks with
    /// normalized relevance.
    #[tokio::test]
    async fn adapts_pipeline_output() {
        let mut pipeline = RagPipeline::new(RagConfig::default());
        pipeline.add_source(Arc::new(MockSource::with_chunks(
            SourceKind::Vector,
            vec![chunk("a", SourceKind::Vector, 0.8, "content")],
        )));
        let source = RagSource::new(Arc::new(pipeline));

        let retrieval = source.retrieve(&SourceQuery::new("content")).await.unwrap();
        assert_eq!(retrieval.chunks.len(), 1);
        assert_eq!(retrieval.chunks[0].source, SourceKind::Rag);
        assert!((retrieval.chunks[0].relevance - 1.0).abs() < 1e-6);
    }
}

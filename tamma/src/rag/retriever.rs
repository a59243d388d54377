//! Parallel fan-out over registered retrieval sources.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::source::{timed_retrieve, ContextSource, SourceQuery, SourceResult};
use crate::types::{RetrievedChunk, SourceKind};

/// Fans one query out to every source concurrently with settle-all
/// semantics: a failing source contributes its error, not an abort.
pub struct Retriever {
    sources: Vec<Arc<dyn ContextSource>>,
    per_source_timeout: Duration,
}

impl Retriever {
    pub fn new(per_source_timeout: Duration) -> Self {
        Self {
            sources: Vec::new(),
            per_source_timeout,
        }
    }

    pub fn add_source(&mut self, source: Arc<dyn ContextSource>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Arc<dyn ContextSource>] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Runs the query against all sources in parallel. Results come back in
    /// source registration order regardless of completion order.
    pub async fn retrieve_all(&self, query: &SourceQuery) -> Vec<SourceResult> {
        let futures = self
            .sources
            .iter()
            .map(|source| timed_retrieve(source.as_ref(), query, self.per_source_timeout));
        join_all(futures).await
    }

    /// Per-source ranked lists for rank fusion, skipping failed sources.
    pub fn ranked_lists(results: &[SourceResult]) -> Vec<(SourceKind, Vec<RetrievedChunk>)> {
        results
            .iter()
            .filter(|r| r.error.is_none())
            .map(|r| {
                let mut list: Vec<RetrievedChunk> = r
                    .chunks
                    .iter()
                    .cloned()
                    .map(RetrievedChunk::new)
                    .collect();
                list.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
                });
                (r.source, list)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::{chunk, MockSource};

    /// **Scenario**: one failing source does not stop the healthy one; both
    /// report a result.
    #[tokio::test]
    async fn settle_all_semantics() {
        let mut retriever = Retriever::new(Duration::from_secs(1));
        retriever.add_source(Arc::new(MockSource::with_chunks(
            SourceKind::Keyword,
            vec![chunk("k1", SourceKind::Keyword, 0.9, "keyword hit")],
        )));
        retriever.add_source(Arc::new(MockSource::failing(SourceKind::Vector)));

        let results = retriever.retrieve_all(&SourceQuery::new("q")).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].error.is_none());
        assert_eq!(results[0].chunks.len(), 1);
        assert!(results[1].error.is_some());
        assert!(results[1].chunks.is_empty());
    }

    /// **Scenario**: ranked lists order best-first and drop failed sources.
    #[tokio::test]
    async fn ranked_lists_ordering() {
        let mut retriever = Retriever::new(Duration::from_secs(1));
        retriever.add_source(Arc::new(MockSource::with_chunks(
            SourceKind::Keyword,
            vec![
                chunk("low", SourceKind::Keyword, 0.2, "low"),
                chunk("high", SourceKind::Keyword, 0.9, "high"),
            ],
        )));
        retriever.add_source(Arc::new(MockSource::failing(SourceKind::Vector)));

        let results = retriever.retrieve_all(&SourceQuery::new("q")).await;
        let lists = Retriever::ranked_lists(&results);
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].1[0].chunk.id, "high");
        assert_eq!(lists[0].1[1].chunk.id, "low");
    }
}

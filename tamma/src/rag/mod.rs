//! Retrieval-augmented context pipeline: query processing, parallel
//! retrieval, rank fusion, diversification, budget packing, result cache,
//! and feedback capture.

mod assembler;
mod cache;
mod feedback;
pub mod query;
mod ranker;
mod retriever;

pub use assembler::pack_chunks;
pub use cache::LruTtlCache;
pub use feedback::{ChunkFeedback, FeedbackTracker, SourceFeedback};
pub use query::{
    classify_intent, expand_query, extract_entities, process_query, Entity, EntityKind,
    ProcessedQuery, QueryIntent,
};
pub use ranker::{
    apply_recency_boost, cosine_similarity, dedup_chunks, mmr_select, rrf_fuse, RankingConfig,
};
pub use retriever::Retriever;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::source::{ContextSource, SourceError, SourceQuery};
use crate::types::{fnv1a32, AssemblyFormat, RetrievedChunk};

/// How per-source rankings combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    /// Reciprocal-rank fusion (default).
    #[default]
    Rrf,
    /// Skip fusion; order by raw source relevance.
    Relevance,
}

/// Assembly-stage options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssemblyConfig {
    pub max_tokens: usize,
    pub format: AssemblyFormat,
    pub include_scores: bool,
    pub deduplication_threshold: f32,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8_000,
            format: AssemblyFormat::Markdown,
            include_scores: false,
            deduplication_threshold: 0.92,
        }
    }
}

/// Pipeline timeouts; the earliest expiration wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RagTimeouts {
    pub per_source_ms: u64,
    pub total_ms: u64,
}

impl Default for RagTimeouts {
    fn default() -> Self {
        Self {
            per_source_ms: 5_000,
            total_ms: 15_000,
        }
    }
}

/// Full pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RagConfig {
    pub fusion_method: FusionMethod,
    pub ranking: RankingConfig,
    pub assembly: AssemblyConfig,
    pub timeouts: RagTimeouts,
}

/// Result of one pipeline run.
#[derive(Clone, Debug)]
pub struct RagResult {
    pub chunks: Vec<RetrievedChunk>,
    pub cache_hit: bool,
    pub latency_ms: u64,
    pub processed: ProcessedQuery,
}

const CACHE_TTL: Duration = Duration::from_secs(300);
const CACHE_MAX_ENTRIES: usize = 128;

/// The pipeline: sources in, ranked and diversified chunks out.
pub struct RagPipeline {
    config: RagConfig,
    retriever: Retriever,
    cache: LruTtlCache<Vec<RetrievedChunk>>,
    feedback: FeedbackTracker,
}

impl RagPipeline {
    pub fn new(config: RagConfig) -> Self {
        let retriever = Retriever::new(Duration::from_millis(config.timeouts.per_source_ms));
        Self {
            config,
            retriever,
            cache: LruTtlCache::new(CACHE_TTL, CACHE_MAX_ENTRIES),
            feedback: FeedbackTracker::new(),
        }
    }

    pub fn add_source(&mut self, source: Arc<dyn ContextSource>) {
        self.retriever.add_source(source);
    }

    pub fn feedback(&self) -> &FeedbackTracker {
        &self.feedback
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    fn cache_key(query: &str, max_chunks: usize) -> u32 {
        fnv1a32(format!("{query}\u{1}{max_chunks}").as_bytes())
    }

    /// Runs the full pipeline for one query. `max_chunks` bounds the MMR
    /// selection; token packing happens downstream in the aggregator (or via
    /// [`pack_chunks`] for direct callers).
    pub async fn retrieve(
        &self,
        query: &str,
        max_chunks: usize,
        cancel: &CancellationToken,
    ) -> Result<RagResult, SourceError> {
        let start = Instant::now();
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        let processed = process_query(query);

        let key = Self::cache_key(query, max_chunks);
        if let Some(chunks) = self.cache.get(key) {
            debug!(query, "rag cache hit");
            return Ok(RagResult {
                chunks,
                cache_hit: true,
                latency_ms: start.elapsed().as_millis() as u64,
                processed,
            });
        }

        let source_query = SourceQuery {
            text: processed.original.clone(),
            expanded_terms: processed.expanded.clone(),
            embedding: None,
            max_chunks,
            token_budget: self.config.assembly.max_tokens,
            filters: Default::default(),
        };

        let total = Duration::from_millis(self.config.timeouts.total_ms);
        let results = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            gathered = tokio::time::timeout(total, self.retriever.retrieve_all(&source_query)) => {
                gathered.map_err(|_| SourceError::Timeout(total.as_millis() as u64))?
            }
        };

        let lists = Retriever::ranked_lists(&results);
        let mut fused = match self.config.fusion_method {
            FusionMethod::Rrf => rrf_fuse(&lists, self.config.ranking.rrf_k),
            FusionMethod::Relevance => {
                let mut all: Vec<RetrievedChunk> =
                    lists.into_iter().flat_map(|(_, l)| l).collect();
                all.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
                });
                all
            }
        };

        apply_recency_boost(
            &mut fused,
            self.config.ranking.recency_boost,
            self.config.ranking.recency_decay_days,
        );
        let deduped = dedup_chunks(fused, self.config.ranking.dedup_threshold);
        let selected = mmr_select(deduped, max_chunks, self.config.ranking.mmr_lambda);

        self.cache.set(key, selected.clone());
        Ok(RagResult {
            chunks: selected,
            cache_hit: false,
            latency_ms: start.elapsed().as_millis() as u64,
            processed,
        })
    }
}

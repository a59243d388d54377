//! Context aggregator: fans a request out to retrieval sources, dedups,
//! ranks, packs to the token budget, renders, and caches the response.

mod budget;
mod dedup;
mod render;

pub use budget::{allocate_budgets, clamp_chunk, default_priorities, default_sources};
pub use dedup::{deduplicate, DedupOutcome, DeduplicationConfig};
pub use render::render;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ErrorCategory;
use crate::rag::{
    apply_recency_boost, expand_query, mmr_select, pack_chunks, rrf_fuse, LruTtlCache,
    RankingConfig,
};
use crate::source::{timed_retrieve, ContextSource, SourceError, SourceQuery, SourceResult};
use crate::types::{
    fnv1a32, AggregationMetrics, ContextChunk, ContextRequest, ContextResponse, RetrievedChunk,
    SourceKind,
};

/// Errors from aggregation.
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("no sources available for the request")]
    NoSources,
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("aggregation timed out after {0}ms")]
    Timeout(u64),
    #[error("cancelled")]
    Cancelled,
}

impl AggregatorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AggregatorError::NoSources => ErrorCategory::Configuration,
            AggregatorError::Source(e) => e.category(),
            AggregatorError::Timeout(_) => ErrorCategory::Transient,
            AggregatorError::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// Response cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CachingConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_entries: usize,
    /// Cache backend name; only `memory` ships in the core.
    pub provider: String,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            max_entries: 128,
            provider: "memory".into(),
        }
    }
}

/// Token budget settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetConfig {
    pub default_max_tokens: usize,
    pub reserved_tokens: usize,
    pub min_chunk_tokens: usize,
    pub max_chunk_tokens: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: 8_000,
            reserved_tokens: 500,
            min_chunk_tokens: 5,
            max_chunk_tokens: 2_000,
        }
    }
}

/// Aggregator configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregatorConfig {
    /// Chunk cap per source before ranking.
    pub per_source_max_chunks: HashMap<SourceKind, usize>,
    pub default_max_chunks_per_source: usize,
    /// Cap on ranked chunks entering budget packing.
    pub max_total_chunks: usize,
    pub per_source_timeout_ms: u64,
    pub total_timeout_ms: u64,
    pub caching: CachingConfig,
    pub budget: BudgetConfig,
    pub deduplication: DeduplicationConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            per_source_max_chunks: HashMap::new(),
            default_max_chunks_per_source: 20,
            max_total_chunks: 50,
            per_source_timeout_ms: 5_000,
            total_timeout_ms: 20_000,
            caching: CachingConfig::default(),
            budget: BudgetConfig::default(),
            deduplication: DeduplicationConfig::default(),
        }
    }
}

/// Orchestrates retrieval sources into token-bounded context bundles.
pub struct ContextAggregator {
    config: AggregatorConfig,
    ranking: RankingConfig,
    sources: Vec<Arc<dyn ContextSource>>,
    cache: LruTtlCache<ContextResponse>,
}

impl ContextAggregator {
    pub fn new(config: AggregatorConfig, ranking: RankingConfig) -> Self {
        let cache = LruTtlCache::new(
            Duration::from_secs(config.caching.ttl_seconds),
            config.caching.max_entries,
        );
        Self {
            config,
            ranking,
            sources: Vec::new(),
            cache,
        }
    }

    /// Registration order doubles as source priority for rank tie-breaks.
    pub fn add_source(&mut self, source: Arc<dyn ContextSource>) {
        self.sources.push(source);
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Availability probe per registered source.
    pub async fn health_check(&self) -> HashMap<SourceKind, bool> {
        let mut out = HashMap::new();
        for source in &self.sources {
            out.insert(source.kind(), source.is_available().await);
        }
        out
    }

    fn request_hash(request: &ContextRequest) -> u32 {
        let mut sources: Vec<&str> = request
            .sources
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(SourceKind::as_str)
            .collect();
        sources.sort_unstable();
        let key = format!(
            "{}\u{1}{}\u{1}{}\u{1}{}\u{1}{}",
            request.query,
            request.task_type.as_str(),
            request.max_tokens,
            sources.join(","),
            request.hints.join(","),
        );
        fnv1a32(key.as_bytes())
    }

    fn selected_sources(&self, kinds: &[SourceKind]) -> Vec<Arc<dyn ContextSource>> {
        self.sources
            .iter()
            .filter(|s| kinds.contains(&s.kind()))
            .cloned()
            .collect()
    }

    fn source_query(
        &self,
        request: &ContextRequest,
        kind: SourceKind,
        token_budget: usize,
    ) -> SourceQuery {
        let mut expanded = expand_query(&request.query);
        expanded.extend(request.hints.iter().cloned());
        let cap = request
            .options
            .max_chunks_per_source
            .or_else(|| self.config.per_source_max_chunks.get(&kind).copied())
            .unwrap_or(self.config.default_max_chunks_per_source);
        SourceQuery {
            text: request.query.clone(),
            expanded_terms: expanded,
            embedding: None,
            max_chunks: cap,
            token_budget,
            filters: Default::default(),
        }
    }

    /// Builds a token-bounded context bundle for the request.
    pub async fn get_context(
        &self,
        request: &ContextRequest,
        cancel: &CancellationToken,
    ) -> Result<ContextResponse, AggregatorError> {
        let start = Instant::now();
        if cancel.is_cancelled() {
            return Err(AggregatorError::Cancelled);
        }

        let key = Self::request_hash(request);
        let use_cache = self.config.caching.enabled && !request.options.skip_cache;
        if use_cache {
            if let Some(mut response) = self.cache.get(key) {
                debug!(query = %request.query, "aggregator cache hit");
                response.cache_hit = true;
                response.metrics.total_latency_ms = start.elapsed().as_millis() as u64;
                return Ok(response);
            }
        }

        let effective_budget = request.effective_budget();
        let kinds = request
            .sources
            .clone()
            .unwrap_or_else(|| default_sources(request.task_type));
        let selected = self.selected_sources(&kinds);
        if selected.is_empty() {
            return Err(AggregatorError::NoSources);
        }
        let selected_kinds: Vec<SourceKind> = selected.iter().map(|s| s.kind()).collect();
        let budgets = allocate_budgets(
            effective_budget,
            &selected_kinds,
            request.task_type,
            &request.source_priorities,
        );

        let per_source_timeout = Duration::from_millis(
            request
                .options
                .per_source_timeout_ms
                .unwrap_or(self.config.per_source_timeout_ms),
        );
        let total_timeout = Duration::from_millis(
            request
                .options
                .total_timeout_ms
                .unwrap_or(self.config.total_timeout_ms),
        );

        let fanout = join_all(selected.iter().map(|source| {
            let kind = source.kind();
            let query =
                self.source_query(request, kind, budgets.get(&kind).copied().unwrap_or(0));
            async move { timed_retrieve(source.as_ref(), &query, per_source_timeout).await }
        }));
        let results: Vec<SourceResult> = tokio::select! {
            _ = cancel.cancelled() => return Err(AggregatorError::Cancelled),
            gathered = tokio::time::timeout(total_timeout, fanout) => {
                gathered.map_err(|_| AggregatorError::Timeout(total_timeout.as_millis() as u64))?
            }
        };

        let contributions: Vec<_> = results.iter().map(SourceResult::contribution).collect();
        let sources_succeeded = contributions.iter().filter(|c| c.error.is_none()).count();

        let gathered: Vec<ContextChunk> = results
            .iter()
            .flat_map(|r| r.chunks.iter().cloned())
            .filter_map(|c| {
                clamp_chunk(
                    c,
                    self.config.budget.min_chunk_tokens,
                    self.config.budget.max_chunk_tokens,
                )
            })
            .collect();
        let initial = gathered.len();

        let outcome = deduplicate(gathered, &self.config.deduplication);
        let dedup_rate = if initial == 0 {
            0.0
        } else {
            outcome.removed as f32 / initial as f32
        };

        // Per-source ranked lists in registration order (= source priority).
        let lists: Vec<(SourceKind, Vec<RetrievedChunk>)> = selected_kinds
            .iter()
            .map(|kind| {
                let mut list: Vec<RetrievedChunk> = outcome
                    .chunks
                    .iter()
                    .filter(|c| c.source == *kind)
                    .cloned()
                    .map(RetrievedChunk::new)
                    .collect();
                list.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
                });
                (*kind, list)
            })
            .collect();
        let mut ranked = rrf_fuse(&lists, self.ranking.rrf_k);
        apply_recency_boost(
            &mut ranked,
            self.ranking.recency_boost,
            self.ranking.recency_decay_days,
        );
        let ranked = mmr_select(ranked, self.config.max_total_chunks, self.ranking.mmr_lambda);

        let packed = pack_chunks(ranked, effective_budget);
        let total_tokens: usize = packed.iter().map(|c| c.token_count).sum();
        let format = request.options.format.unwrap_or_default();
        let text = render(&packed, format, false);

        let response = ContextResponse {
            total_tokens,
            effective_budget,
            text,
            chunks: packed,
            contributions,
            cache_hit: false,
            metrics: AggregationMetrics {
                total_latency_ms: start.elapsed().as_millis() as u64,
                tokens_used: total_tokens,
                budget_utilization: if effective_budget == 0 {
                    0.0
                } else {
                    total_tokens as f32 / effective_budget as f32
                },
                dedup_rate,
                sources_queried: selected.len(),
                sources_succeeded,
            },
        };

        if use_cache {
            self.cache.set(key, response.clone());
        }
        info!(
            query = %request.query,
            chunks = response.chunks.len(),
            tokens = total_tokens,
            sources_succeeded,
            "context assembled"
        );
        Ok(response)
    }

    /// Streaming variant: assembles the full response, then yields its
    /// chunks in order over a channel bounded by the response size.
    pub async fn stream_context(
        &self,
        request: &ContextRequest,
        cancel: &CancellationToken,
    ) -> Result<ReceiverStream<ContextChunk>, AggregatorError> {
        let response = self.get_context(request, cancel).await?;
        let (tx, rx) = mpsc::channel(response.chunks.len().max(1));
        tokio::spawn(async move {
            for chunk in response.chunks {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::{chunk, MockSource};
    use crate::types::TaskType;

    fn aggregator_two_sources(failing: bool) -> ContextAggregator {
        let mut agg = ContextAggregator::new(AggregatorConfig::default(), RankingConfig::default());
        agg.add_source(Arc::new(MockSource::with_chunks(
            SourceKind::Keyword,
            vec![
                chunk("k1", SourceKind::Keyword, 0.9, "keyword hit about the session store"),
                chunk("k2", SourceKind::Keyword, 0.5, "another keyword match on auth flows"),
            ],
        )));
        if failing {
            agg.add_source(Arc::new(MockSource::failing(SourceKind::Vector)));
        } else {
            agg.add_source(Arc::new(MockSource::with_chunks(
                SourceKind::Vector,
                vec![chunk("v1", SourceKind::Vector, 0.8, "vector hit on the session store")],
            )));
        }
        agg
    }

    fn request() -> ContextRequest {
        let mut req = ContextRequest::new("session store", TaskType::General, 1000);
        req.reserved_tokens = 100;
        req.sources = Some(vec![SourceKind::Keyword, SourceKind::Vector]);
        req
    }

    /// **Scenario**: one failing source still yields the healthy source's
    /// chunks, with the failure recorded in its contribution.
    #[tokio::test]
    async fn failing_source_is_isolated() {
        let agg = aggregator_two_sources(true);
        let cancel = CancellationToken::new();
        let response = agg.get_context(&request(), &cancel).await.unwrap();

        assert!(response.chunks.iter().all(|c| c.source == SourceKind::Keyword));
        assert_eq!(response.metrics.sources_queried, 2);
        assert_eq!(response.metrics.sources_succeeded, 1);
        let failed = response
            .contributions
            .iter()
            .find(|c| c.source == SourceKind::Vector)
            .unwrap();
        assert!(failed.error.is_some());
    }

    /// **Scenario**: the budget law holds: packed tokens never exceed
    /// `max_tokens − reserved_tokens`.
    #[tokio::test]
    async fn budget_law() {
        let agg = aggregator_two_sources(false);
        let cancel = CancellationToken::new();
        let response = agg.get_context(&request(), &cancel).await.unwrap();
        let total: usize = response.chunks.iter().map(|c| c.token_count).sum();
        assert!(total <= 900);
        assert_eq!(response.total_tokens, total);
    }

    /// **Scenario**: two identical requests produce identical chunk id
    /// ordering; the second is a cache hit with no slower latency path.
    #[tokio::test]
    async fn cache_consistency() {
        let agg = aggregator_two_sources(false);
        let cancel = CancellationToken::new();
        let first = agg.get_context(&request(), &cancel).await.unwrap();
        let second = agg.get_context(&request(), &cancel).await.unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        let first_ids: Vec<&str> = first.chunks.iter().map(|c| c.id.as_str()).collect();
        let second_ids: Vec<&str> = second.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
        assert!(second.metrics.total_latency_ms <= first.metrics.total_latency_ms);
    }

    /// **Scenario**: `skip_cache` bypasses the probe.
    #[tokio::test]
    async fn skip_cache_bypasses() {
        let agg = aggregator_two_sources(false);
        let cancel = CancellationToken::new();
        let mut req = request();
        agg.get_context(&req, &cancel).await.unwrap();
        req.options.skip_cache = true;
        let second = agg.get_context(&req, &cancel).await.unwrap();
        assert!(!second.cache_hit);
    }

    /// **Scenario**: requesting only unregistered sources is a config error.
    #[tokio::test]
    async fn no_matching_sources() {
        let agg = aggregator_two_sources(false);
        let cancel = CancellationToken::new();
        let mut req = request();
        req.sources = Some(vec![SourceKind::Mcp]);
        assert!(matches!(
            agg.get_context(&req, &cancel).await,
            Err(AggregatorError::NoSources)
        ));
    }

    /// **Scenario**: the streaming variant yields the assembled chunks in
    /// response order.
    #[tokio::test]
    async fn stream_yields_in_order() {
        use tokio_stream::StreamExt;

        let agg = aggregator_two_sources(false);
        let cancel = CancellationToken::new();
        let expected = agg.get_context(&request(), &cancel).await.unwrap();
        let mut stream = agg.stream_context(&request(), &cancel).await.unwrap();
        let mut streamed = Vec::new();
        while let Some(chunk) = stream.next().await {
            streamed.push(chunk.id);
        }
        let expected_ids: Vec<String> =
            expected.chunks.iter().map(|c| c.id.clone()).collect();
        assert_eq!(streamed, expected_ids);
    }

    /// **Scenario**: a pre-cancelled token aborts before any fan-out.
    #[tokio::test]
    async fn cancelled_before_start() {
        let agg = aggregator_two_sources(false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            agg.get_context(&request(), &cancel).await,
            Err(AggregatorError::Cancelled)
        ));
    }
}

//! Ranking core: reciprocal-rank fusion, recency boost, MMR
//! diversification, and score-aware deduplication.
//!
//! Tie rule: when several sources produce the same chunk at the same rank,
//! the fused score is identical by construction; final ordering then falls
//! back to source priority (the order sources are configured in) and the
//! lexicographic chunk id.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{RetrievedChunk, SourceKind};

/// Ranking knobs; defaults match the documented constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RankingConfig {
    /// RRF constant `k`.
    pub rrf_k: f32,
    /// Balance between relevance and diversity in MMR.
    pub mmr_lambda: f32,
    /// Additive boost weight for fresh chunks.
    pub recency_boost: f32,
    /// e-folding age for the recency decay, in days.
    pub recency_decay_days: f32,
    /// Cosine similarity at which two embedded chunks collapse.
    pub dedup_threshold: f32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            mmr_lambda: 0.7,
            recency_boost: 0.1,
            recency_decay_days: 30.0,
            dedup_threshold: 0.92,
        }
    }
}

/// Cosine similarity; zero when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Reciprocal-rank fusion over per-source ranked lists.
///
/// Each list must already be ordered best-first. A chunk appearing in
/// several lists sums `1 / (k + rank)` per appearance, so presence in more
/// sources strictly raises the fused score. Output is ordered by fused score
/// descending, then source priority (position of the contributing source in
/// `lists`), then chunk id.
pub fn rrf_fuse(
    lists: &[(SourceKind, Vec<RetrievedChunk>)],
    k: f32,
) -> Vec<RetrievedChunk> {
    struct Fused {
        chunk: RetrievedChunk,
        fused: f32,
        best_source_priority: usize,
    }

    let mut by_id: HashMap<String, Fused> = HashMap::new();
    for (priority, (_source, list)) in lists.iter().enumerate() {
        for (rank, retrieved) in list.iter().enumerate() {
            let contribution = 1.0 / (k + (rank + 1) as f32);
            match by_id.get_mut(&retrieved.chunk.id) {
                Some(existing) => {
                    existing.fused += contribution;
                    existing.best_source_priority =
                        existing.best_source_priority.min(priority);
                    // Keep the higher-relevance copy of the content.
                    if retrieved.score > existing.chunk.score {
                        existing.chunk = retrieved.clone();
                    }
                }
                None => {
                    by_id.insert(
                        retrieved.chunk.id.clone(),
                        Fused {
                            chunk: retrieved.clone(),
                            fused: contribution,
                            best_source_priority: priority,
                        },
                    );
                }
            }
        }
    }

    let mut fused: Vec<Fused> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.best_source_priority.cmp(&b.best_source_priority))
            .then_with(|| a.chunk.chunk.id.cmp(&b.chunk.chunk.id))
    });
    fused
        .into_iter()
        .map(|f| {
            let mut retrieved = f.chunk;
            retrieved.fused_score = Some(f.fused);
            retrieved
        })
        .collect()
}

/// Adds `boost × exp(−age_days / decay_days)` for chunks carrying a date.
pub fn apply_recency_boost(chunks: &mut [RetrievedChunk], boost: f32, decay_days: f32) {
    if boost <= 0.0 || decay_days <= 0.0 {
        return;
    }
    let now = Utc::now();
    for retrieved in chunks.iter_mut() {
        let Some(date) = retrieved.chunk.metadata.date else {
            continue;
        };
        let age_days = (now - date).num_seconds().max(0) as f32 / 86_400.0;
        let bump = boost * (-age_days / decay_days).exp();
        retrieved.score += bump;
        if let Some(fused) = retrieved.fused_score.as_mut() {
            *fused += bump;
        }
    }
}

/// Greedy maximal-marginal-relevance selection of `k` chunks.
///
/// Maximises `λ × relevance − (1−λ) × max_sim(candidate, selected)`. Chunks
/// without embeddings fall back to plain top-k by effective score.
pub fn mmr_select(chunks: Vec<RetrievedChunk>, k: usize, lambda: f32) -> Vec<RetrievedChunk> {
    if chunks.len() <= k {
        return chunks;
    }
    let any_embeddings = chunks.iter().any(|c| c.chunk.embedding.is_some());
    if !any_embeddings {
        return chunks.into_iter().take(k).collect();
    }

    let mut remaining = chunks;
    let mut selected: Vec<RetrievedChunk> = Vec::with_capacity(k);
    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_value = f32::NEG_INFINITY;
        for (idx, candidate) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .filter_map(|s| match (&candidate.chunk.embedding, &s.chunk.embedding) {
                    (Some(a), Some(b)) => Some(cosine_similarity(a, b)),
                    _ => None,
                })
                .fold(0.0f32, f32::max);
            let value = lambda * candidate.effective_score() - (1.0 - lambda) * max_sim;
            if value > best_value {
                best_value = value;
                best_idx = idx;
            }
        }
        selected.push(remaining.remove(best_idx));
    }
    selected
}

/// Deduplicates by id first, then collapses embedded chunks whose cosine
/// similarity reaches `threshold`, keeping the higher-scored entry. Input
/// order (best first) is preserved for survivors.
pub fn dedup_chunks(chunks: Vec<RetrievedChunk>, threshold: f32) -> Vec<RetrievedChunk> {
    let mut seen_ids = std::collections::HashSet::new();
    let mut out: Vec<RetrievedChunk> = Vec::with_capacity(chunks.len());

    for candidate in chunks {
        if !seen_ids.insert(candidate.chunk.id.clone()) {
            continue;
        }
        // Input is ordered best-first, so on a similarity hit the kept entry
        // already has the higher effective score.
        let duplicate = candidate.chunk.embedding.as_ref().is_some_and(|embedding| {
            out.iter().any(|kept| {
                kept.chunk
                    .embedding
                    .as_ref()
                    .map(|other| cosine_similarity(embedding, other) >= threshold)
                    .unwrap_or(false)
            })
        });
        if !duplicate {
            out.push(candidate);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkMetadata, ContextChunk};

    fn retrieved(id: &str, source: SourceKind, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: ContextChunk {
                id: id.into(),
                content: format!("content {id}"),
                source,
                relevance: score,
                token_count: 4,
                metadata: ChunkMetadata::default(),
                embedding: None,
            },
            score,
            fused_score: None,
        }
    }

    fn with_embedding(mut r: RetrievedChunk, e: Vec<f32>) -> RetrievedChunk {
        r.chunk.embedding = Some(e);
        r
    }

    /// **Scenario**: fused scores stay in `(0, num_sources]` and a chunk
    /// ranked high in more sources beats single-source chunks.
    #[test]
    fn rrf_bounds_and_multi_source_wins() {
        let lists = vec![
            (
                SourceKind::Vector,
                vec![retrieved("shared", SourceKind::Vector, 0.9), retrieved("v2", SourceKind::Vector, 0.8)],
            ),
            (
                SourceKind::Keyword,
                vec![retrieved("shared", SourceKind::Keyword, 0.7), retrieved("k2", SourceKind::Keyword, 0.6)],
            ),
        ];
        let fused = rrf_fuse(&lists, 60.0);
        assert_eq!(fused[0].chunk.id, "shared");
        for f in &fused {
            let score = f.fused_score.unwrap();
            assert!(score > 0.0 && score <= 2.0);
        }
        let shared = fused.iter().find(|f| f.chunk.id == "shared").unwrap();
        let single = fused.iter().find(|f| f.chunk.id == "v2").unwrap();
        assert!(shared.fused_score.unwrap() > single.fused_score.unwrap());
    }

    /// **Scenario**: equal fused scores tie-break by source priority then id.
    #[test]
    fn rrf_deterministic_ties() {
        let lists = vec![
            (SourceKind::Vector, vec![retrieved("b", SourceKind::Vector, 0.9)]),
            (SourceKind::Keyword, vec![retrieved("a", SourceKind::Keyword, 0.9)]),
        ];
        let fused = rrf_fuse(&lists, 60.0);
        // Same rank in lists of equal weight: the first-configured source wins.
        assert_eq!(fused[0].chunk.id, "b");
        assert_eq!(fused[1].chunk.id, "a");
    }

    /// **Scenario**: recent chunks gain more than stale ones.
    #[test]
    fn recency_boost_decays() {
        let mut fresh = retrieved("fresh", SourceKind::Vector, 0.5);
        fresh.chunk.metadata.date = Some(Utc::now());
        let mut stale = retrieved("stale", SourceKind::Vector, 0.5);
        stale.chunk.metadata.date = Some(Utc::now() - chrono::Duration::days(365));
        let mut undated = retrieved("undated", SourceKind::Vector, 0.5);
        undated.chunk.metadata.date = None;

        let mut chunks = vec![fresh, stale, undated];
        apply_recency_boost(&mut chunks, 0.2, 30.0);
        assert!(chunks[0].score > chunks[1].score);
        assert_eq!(chunks[2].score, 0.5);
    }

    /// **Scenario**: MMR avoids picking two near-identical chunks when a
    /// diverse alternative exists.
    #[test]
    fn mmr_prefers_diversity() {
        let a = with_embedding(retrieved("a", SourceKind::Vector, 1.0), vec![1.0, 0.0]);
        let near_a = with_embedding(retrieved("near_a", SourceKind::Vector, 0.95), vec![0.99, 0.05]);
        let diverse = with_embedding(retrieved("diverse", SourceKind::Vector, 0.6), vec![0.0, 1.0]);
        let selected = mmr_select(vec![a, near_a, diverse], 2, 0.5);
        let ids: Vec<&str> = selected.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "diverse"]);
    }

    /// **Scenario**: without embeddings MMR is plain top-k.
    #[test]
    fn mmr_falls_back_to_top_k() {
        let chunks = vec![
            retrieved("a", SourceKind::Vector, 0.9),
            retrieved("b", SourceKind::Vector, 0.8),
            retrieved("c", SourceKind::Vector, 0.7),
        ];
        let selected = mmr_select(chunks, 2, 0.7);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].chunk.id, "a");
    }

    /// **Scenario**: id duplicates and near-identical embeddings collapse to
    /// the first (higher-ranked) copy.
    #[test]
    fn dedup_by_id_and_similarity() {
        let first = with_embedding(retrieved("a", SourceKind::Vector, 0.9), vec![1.0, 0.0]);
        let id_dup = retrieved("a", SourceKind::Keyword, 0.3);
        let semantic_dup =
            with_embedding(retrieved("b", SourceKind::Keyword, 0.5), vec![0.999, 0.01]);
        let distinct = with_embedding(retrieved("c", SourceKind::Rag, 0.4), vec![0.0, 1.0]);

        let out = dedup_chunks(vec![first, id_dup, semantic_dup, distinct], 0.95);
        let ids: Vec<&str> = out.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    /// **Scenario**: cosine is symmetric and zero on zero vectors.
    #[test]
    fn cosine_properties() {
        let a = [1.0, 2.0, 3.0];
        let b = [3.0, 2.0, 1.0];
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &a[..2]), 0.0);
    }
}

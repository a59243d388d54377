//! Three-phase chunk deduplication: content hash, line-overlap merge,
//! semantic grouping.
//!
//! Each phase can only shrink or preserve the chunk count. Input is sorted
//! by relevance first so "keep the higher-relevance one" falls out of
//! keep-first scanning.

use crate::rag::cosine_similarity;
use crate::types::{fnv1a32, ContextChunk};

/// Which phases run and the semantic threshold.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeduplicationConfig {
    pub enabled: bool,
    pub use_content_hash: bool,
    pub use_semantic: bool,
    pub similarity_threshold: f32,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_content_hash: true,
            use_semantic: true,
            similarity_threshold: 0.92,
        }
    }
}

/// Result of a dedup pass.
#[derive(Debug)]
pub struct DedupOutcome {
    pub chunks: Vec<ContextChunk>,
    pub removed: usize,
}

fn content_hash(content: &str) -> u32 {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
    fnv1a32(normalized.as_bytes())
}

fn sort_by_relevance(chunks: &mut [ContextChunk]) {
    chunks.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Phase a: identical content after whitespace normalisation.
fn dedup_content_hash(chunks: Vec<ContextChunk>) -> Vec<ContextChunk> {
    let mut seen = std::collections::HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(content_hash(&chunk.content)))
        .collect()
}

/// Line-range overlap as a fraction of the shorter chunk's span.
fn overlap_fraction(a: &ContextChunk, b: &ContextChunk) -> Option<f32> {
    let (a_start, a_end) = (a.metadata.start_line?, a.metadata.end_line?);
    let (b_start, b_end) = (b.metadata.start_line?, b.metadata.end_line?);
    if a_end < a_start || b_end < b_start {
        return None;
    }
    let overlap = a_end.min(b_end).saturating_sub(a_start.max(b_start)) + 1;
    if a_end.min(b_end) < a_start.max(b_start) {
        return Some(0.0);
    }
    let shorter = (a_end - a_start + 1).min(b_end - b_start + 1);
    Some(overlap as f32 / shorter as f32)
}

/// Phase b: chunks in the same file whose line ranges overlap ≥ 50 % of the
/// shorter span collapse to the higher-relevance one.
fn dedup_overlap(chunks: Vec<ContextChunk>) -> Vec<ContextChunk> {
    let mut kept: Vec<ContextChunk> = Vec::with_capacity(chunks.len());
    for candidate in chunks {
        let overlaps_kept = kept.iter().any(|existing| {
            existing.metadata.file_path.is_some()
                && existing.metadata.file_path == candidate.metadata.file_path
                && overlap_fraction(existing, &candidate)
                    .map(|f| f >= 0.5)
                    .unwrap_or(false)
        });
        if !overlaps_kept {
            kept.push(candidate);
        }
    }
    kept
}

/// Phase c: embedded chunks whose cosine similarity reaches the threshold
/// group together; the highest-relevance member survives.
fn dedup_semantic(chunks: Vec<ContextChunk>, threshold: f32) -> Vec<ContextChunk> {
    let mut kept: Vec<ContextChunk> = Vec::with_capacity(chunks.len());
    for candidate in chunks {
        let duplicate = candidate.embedding.as_ref().is_some_and(|embedding| {
            kept.iter().any(|existing| {
                existing
                    .embedding
                    .as_ref()
                    .map(|other| cosine_similarity(embedding, other) >= threshold)
                    .unwrap_or(false)
            })
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// Runs the enabled phases in order. Monotone: output length never exceeds
/// input length, and disabling a phase can only keep more chunks.
pub fn deduplicate(mut chunks: Vec<ContextChunk>, config: &DeduplicationConfig) -> DedupOutcome {
    let initial = chunks.len();
    if !config.enabled {
        return DedupOutcome { chunks, removed: 0 };
    }
    sort_by_relevance(&mut chunks);
    if config.use_content_hash {
        chunks = dedup_content_hash(chunks);
    }
    chunks = dedup_overlap(chunks);
    if config.use_semantic {
        chunks = dedup_semantic(chunks, config.similarity_threshold);
    }
    DedupOutcome {
        removed: initial - chunks.len(),
        chunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::chunk;
    use crate::types::SourceKind;

    fn spanned(id: &str, relevance: f32, path: &str, start: u32, end: u32) -> ContextChunk {
        let mut c = chunk(id, SourceKind::Keyword, relevance, &format!("body {id}"));
        c.metadata.file_path = Some(path.to_string());
        c.metadata.start_line = Some(start);
        c.metadata.end_line = Some(end);
        c
    }

    /// **Scenario**: whitespace-normalised duplicates collapse to the
    /// higher-relevance copy.
    #[test]
    fn content_hash_phase() {
        let a = chunk("a", SourceKind::Vector, 0.9, "fn  main() {\n}");
        let b = chunk("b", SourceKind::Keyword, 0.5, "fn main() { }");
        let outcome = deduplicate(vec![b, a], &DeduplicationConfig::default());
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].id, "a");
        assert_eq!(outcome.removed, 1);
    }

    /// **Scenario**: same-file ranges overlapping ≥ 50 % of the shorter span
    /// merge; disjoint ranges survive.
    #[test]
    fn overlap_phase() {
        let big = spanned("big", 0.9, "src/a.rs", 1, 100);
        let inside = spanned("inside", 0.6, "src/a.rs", 10, 40);
        let elsewhere = spanned("elsewhere", 0.5, "src/a.rs", 200, 220);
        let other_file = spanned("other", 0.4, "src/b.rs", 10, 40);

        let outcome = deduplicate(
            vec![big, inside, elsewhere, other_file],
            &DeduplicationConfig::default(),
        );
        let ids: Vec<&str> = outcome.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["big", "elsewhere", "other"]);
    }

    /// **Scenario**: embedded near-duplicates group; highest relevance wins.
    #[test]
    fn semantic_phase() {
        let mut a = chunk("a", SourceKind::Vector, 0.9, "alpha");
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = chunk("b", SourceKind::Vector, 0.5, "beta");
        b.embedding = Some(vec![0.999, 0.01]);
        let mut c = chunk("c", SourceKind::Vector, 0.4, "gamma");
        c.embedding = Some(vec![0.0, 1.0]);

        let outcome = deduplicate(vec![b, c, a], &DeduplicationConfig::default());
        let ids: Vec<&str> = outcome.chunks.iter().map(|x| x.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    /// **Scenario**: each phase can only shrink or preserve the count.
    #[test]
    fn monotonic_phases() {
        let chunks = vec![
            chunk("a", SourceKind::Vector, 0.9, "same text"),
            chunk("b", SourceKind::Keyword, 0.5, "same text"),
            chunk("c", SourceKind::Rag, 0.4, "different text"),
        ];
        let disabled = DeduplicationConfig {
            enabled: false,
            ..Default::default()
        };
        let hash_only = DeduplicationConfig {
            use_semantic: false,
            ..Default::default()
        };
        let all = DeduplicationConfig::default();

        let n0 = deduplicate(chunks.clone(), &disabled).chunks.len();
        let n1 = deduplicate(chunks.clone(), &hash_only).chunks.len();
        let n2 = deduplicate(chunks, &all).chunks.len();
        assert!(n0 >= n1);
        assert!(n1 >= n2);
    }
}

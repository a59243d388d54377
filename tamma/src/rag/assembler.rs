//! Token-budget packing of ranked chunks.

use crate::types::{ContextChunk, RetrievedChunk};

/// Packs chunks in ranked order while the running token total stays within
/// `budget`. A chunk that does not fit is skipped, not truncated; later,
/// smaller chunks may still fit.
pub fn pack_chunks(ranked: Vec<RetrievedChunk>, budget: usize) -> Vec<ContextChunk> {
    let mut total = 0usize;
    let mut out = Vec::new();
    for retrieved in ranked {
        let tokens = retrieved.chunk.token_count;
        if tokens == 0 {
            continue;
        }
        if total + tokens > budget {
            continue;
        }
        total += tokens;
        out.push(retrieved.chunk);
    }
    out
}

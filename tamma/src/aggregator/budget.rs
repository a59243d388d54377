//! Source selection and proportional budget allocation.

use std::collections::HashMap;

use crate::types::{ContextChunk, SourceKind, TaskType};

/// Default source set per task type. Explicit request sources override this.
pub fn default_sources(task_type: TaskType) -> Vec<SourceKind> {
    match task_type {
        TaskType::CodeGeneration | TaskType::BugFix | TaskType::Refactoring => vec![
            SourceKind::Vector,
            SourceKind::Keyword,
            SourceKind::Rag,
            SourceKind::Mcp,
        ],
        TaskType::Documentation => vec![SourceKind::Keyword, SourceKind::Rag, SourceKind::Mcp],
        TaskType::Review => vec![SourceKind::Vector, SourceKind::Keyword],
        TaskType::General => vec![SourceKind::Vector, SourceKind::Keyword, SourceKind::Rag],
    }
}

/// Default relative weights per task type, before request overlays.
pub fn default_priorities(task_type: TaskType) -> HashMap<SourceKind, f32> {
    let pairs: &[(SourceKind, f32)] = match task_type {
        TaskType::CodeGeneration | TaskType::Refactoring => &[
            (SourceKind::Vector, 1.5),
            (SourceKind::Keyword, 1.0),
            (SourceKind::Rag, 1.5),
            (SourceKind::Mcp, 0.5),
        ],
        TaskType::BugFix => &[
            (SourceKind::Vector, 1.0),
            (SourceKind::Keyword, 1.5),
            (SourceKind::Rag, 1.0),
            (SourceKind::Mcp, 0.5),
        ],
        TaskType::Documentation => &[
            (SourceKind::Keyword, 1.0),
            (SourceKind::Rag, 1.5),
            (SourceKind::Mcp, 1.0),
        ],
        TaskType::Review | TaskType::General => &[
            (SourceKind::Vector, 1.0),
            (SourceKind::Keyword, 1.0),
            (SourceKind::Rag, 1.0),
            (SourceKind::Mcp, 1.0),
        ],
    };
    pairs.iter().copied().collect()
}

/// Splits the effective budget across sources proportionally to their
/// weights. Request priorities overlay the task-type defaults; sources with
/// no weight anywhere get 1.0. Every selected source receives at least one
/// token when the budget is non-zero.
pub fn allocate_budgets(
    effective_budget: usize,
    sources: &[SourceKind],
    task_type: TaskType,
    overrides: &HashMap<SourceKind, f32>,
) -> HashMap<SourceKind, usize> {
    let defaults = default_priorities(task_type);
    let weights: Vec<(SourceKind, f32)> = sources
        .iter()
        .map(|kind| {
            let weight = overrides
                .get(kind)
                .or_else(|| defaults.get(kind))
                .copied()
                .unwrap_or(1.0)
                .max(0.0);
            (*kind, weight)
        })
        .collect();
    let total: f32 = weights.iter().map(|(_, w)| w).sum();
    if total <= 0.0 || effective_budget == 0 {
        return sources.iter().map(|k| (*k, 0)).collect();
    }
    weights
        .into_iter()
        .map(|(kind, weight)| {
            let share = ((effective_budget as f32) * weight / total).floor() as usize;
            (kind, share.max(1))
        })
        .collect()
}

/// Applies the configured chunk size window: chunks under `min_tokens` are
/// dropped, chunks over `max_tokens` are truncated to fit.
pub fn clamp_chunk(
    mut chunk: ContextChunk,
    min_tokens: usize,
    max_tokens: usize,
) -> Option<ContextChunk> {
    if chunk.token_count < min_tokens {
        return None;
    }
    if max_tokens > 0 && chunk.token_count > max_tokens {
        let keep_chars = max_tokens * 4;
        let truncated: String = chunk.content.chars().take(keep_chars).collect();
        chunk.content = truncated;
        chunk.token_count = max_tokens;
    }
    Some(chunk)
}

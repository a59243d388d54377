//! Core data model: issues, plans, pull requests, CI, context chunks.
//!
//! These are the shapes that flow between the platform adapter, the engine,
//! the supervisor, and the context aggregator. Platform-owned entities
//! ([`Issue`], [`PullRequest`]) are immutable copies inside the engine; the
//! platform remains the source of truth.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment on an issue, in posting order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssueComment {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// An issue as reported by the hosting platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<IssueComment>,
    /// Issue numbers referenced inline as `#<n>` in the body.
    #[serde(default)]
    pub related: Vec<u64>,
}

/// Action a planned file change performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Modify,
    Delete,
}

/// One planned change to one file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: FileAction,
    pub description: String,
}

/// Coarse complexity estimate attached to a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Structured change plan produced once per issue; immutable thereafter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentPlan {
    pub issue_number: u64,
    pub summary: String,
    pub approach: String,
    #[serde(default)]
    pub file_changes: Vec<FileChange>,
    #[serde(default)]
    pub testing_strategy: String,
    pub estimated_complexity: Complexity,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Pull request state as the platform reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// A pull request. The engine tracks the number; the platform owns the rest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub head: String,
    pub base: String,
    pub state: PrState,
    /// Tri-state: the platform may not have computed mergeability yet.
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub url: String,
    /// Head commit sha, used for CI status lookups.
    pub head_sha: String,
}

/// Combined CI outcome across statuses and check runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiState {
    Pending,
    Success,
    Failure,
    Error,
}

/// Snapshot of CI for one commit; derived on each poll, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CiStatus {
    pub state: CiState,
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub pending: usize,
}

impl CiStatus {
    /// An empty check set counts as success.
    pub fn empty() -> Self {
        Self {
            state: CiState::Success,
            total: 0,
            success: 0,
            failure: 0,
            pending: 0,
        }
    }
}

/// Repository identity and defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub url: String,
}

/// A branch ref.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub sha: String,
}

/// A commit on a branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Context retrieval
// ---------------------------------------------------------------------------

/// What kind of work the requested context will feed. Drives the default
/// source set and prompt shaping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGeneration,
    BugFix,
    Refactoring,
    Documentation,
    Review,
    #[default]
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CodeGeneration => "code_generation",
            TaskType::BugFix => "bug_fix",
            TaskType::Refactoring => "refactoring",
            TaskType::Documentation => "documentation",
            TaskType::Review => "review",
            TaskType::General => "general",
        }
    }
}

/// Stable tag identifying which source produced a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Vector,
    Keyword,
    Rag,
    Mcp,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Vector => "vector",
            SourceKind::Keyword => "keyword",
            SourceKind::Rag => "rag",
            SourceKind::Mcp => "mcp",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positional metadata attached to a chunk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,
    /// Last-modified date when the source knows it; feeds the recency boost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

/// One retrieved piece of context, re-scored by the ranker and packed by the
/// assembler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub id: String,
    pub content: String,
    pub source: SourceKind,
    /// Normalized relevance in `[0, 1]`.
    pub relevance: f32,
    pub token_count: usize,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    /// Present when the producing source computed one; enables semantic dedup
    /// and MMR.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Internal RAG form: a chunk plus its ranking scores.
#[derive(Clone, Debug)]
pub struct RetrievedChunk {
    pub chunk: ContextChunk,
    pub score: f32,
    pub fused_score: Option<f32>,
}

impl RetrievedChunk {
    pub fn new(chunk: ContextChunk) -> Self {
        let score = chunk.relevance;
        Self {
            chunk,
            score,
            fused_score: None,
        }
    }

    /// Effective score: fused when fusion ran, raw otherwise.
    pub fn effective_score(&self) -> f32 {
        self.fused_score.unwrap_or(self.score)
    }
}

/// Output rendering for assembled context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssemblyFormat {
    Plain,
    #[default]
    Markdown,
    Xml,
}

/// Per-request tuning knobs; all optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestOptions {
    pub skip_cache: bool,
    pub per_source_timeout_ms: Option<u64>,
    pub total_timeout_ms: Option<u64>,
    pub format: Option<AssemblyFormat>,
    pub max_chunks_per_source: Option<usize>,
}

/// A context retrieval request. Immutable per retrieval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextRequest {
    pub query: String,
    pub task_type: TaskType,
    pub max_tokens: usize,
    #[serde(default)]
    pub reserved_tokens: usize,
    /// Explicit source subset; `None` means the default set for the task type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceKind>>,
    /// Relative weights overlaid onto task-type defaults.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub source_priorities: HashMap<SourceKind, f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(default)]
    pub options: RequestOptions,
}

impl ContextRequest {
    pub fn new(query: impl Into<String>, task_type: TaskType, max_tokens: usize) -> Self {
        Self {
            query: query.into(),
            task_type,
            max_tokens,
            reserved_tokens: 0,
            sources: None,
            source_priorities: HashMap::new(),
            hints: Vec::new(),
            options: RequestOptions::default(),
        }
    }

    /// Tokens actually available for chunks.
    pub fn effective_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens)
    }
}

/// What one source contributed to a response, including its failure if any.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source: SourceKind,
    pub chunks: usize,
    pub latency_ms: u64,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregation metrics recorded on every response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationMetrics {
    pub total_latency_ms: u64,
    pub tokens_used: usize,
    /// Assembled tokens divided by the effective budget.
    pub budget_utilization: f32,
    /// `removed / initial` across all dedup phases.
    pub dedup_rate: f32,
    pub sources_queried: usize,
    pub sources_succeeded: usize,
}

/// Assembled, token-bounded context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextResponse {
    pub chunks: Vec<ContextChunk>,
    pub text: String,
    pub total_tokens: usize,
    pub effective_budget: usize,
    pub contributions: Vec<SourceContribution>,
    pub cache_hit: bool,
    pub metrics: AggregationMetrics,
}

/// Rough token estimate: one token per four characters, minimum one for
/// non-empty text. Good enough for budget packing; exact counts live with
/// the model provider.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

/// FNV-1a 32-bit hash, used for cache keys over request fields.
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: token estimate is zero only for empty text and rounds up.
    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    /// **Scenario**: FNV-1a is deterministic and sensitive to input order.
    #[test]
    fn fnv1a32_deterministic() {
        assert_eq!(fnv1a32(b"hello"), fnv1a32(b"hello"));
        assert_ne!(fnv1a32(b"ab"), fnv1a32(b"ba"));
        // Known vector for the empty input: the offset basis.
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
    }

    /// **Scenario**: effective budget subtracts reserved tokens and saturates.
    #[test]
    fn effective_budget_saturates() {
        let mut req = ContextRequest::new("q", TaskType::General, 100);
        req.reserved_tokens = 30;
        assert_eq!(req.effective_budget(), 70);
        req.reserved_tokens = 200;
        assert_eq!(req.effective_budget(), 0);
    }

    /// **Scenario**: wire enums serialize to the documented lowercase tags.
    #[test]
    fn source_kind_serde_tags() {
        assert_eq!(serde_json::to_string(&SourceKind::Mcp).unwrap(), "\"mcp\"");
        assert_eq!(
            serde_json::to_string(&FileAction::Modify).unwrap(),
            "\"modify\""
        );
        let plan: Complexity = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(plan, Complexity::High);
    }
}

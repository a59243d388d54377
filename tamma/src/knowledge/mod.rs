//! Knowledge base: pre-task checks, duplicate detection, learning capture.
//!
//! Entries persist behind the [`KnowledgeStore`] port; the core only scores
//! and filters them against the task at hand.

mod checker;
mod duplicate;
mod learning;
mod matchers;

pub use checker::{CheckResult, CheckerConfig, MatchedEntry, PreTaskChecker, TaskContext};
pub use duplicate::DuplicateDetector;
pub use learning::{LearningCapture, TaskOutcome};
pub use matchers::{dice_coefficient, jaccard, keyword_score, pattern_score};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors from knowledge operations.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("knowledge store: {0}")]
    Store(String),
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

/// What kind of knowledge an entry carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Prohibition,
    Recommendation,
    Learning,
}

/// Entry priority; `critical` prohibitions can block a task outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// A persisted knowledge entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub kind: EntryKind,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// File globs the entry applies to.
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Query the checker builds from the task and plan.
#[derive(Clone, Debug, Default)]
pub struct KnowledgeQuery {
    pub task_type: crate::types::TaskType,
    pub description: String,
    pub project_id: Option<String>,
    pub agent_type: String,
    pub file_paths: Vec<String>,
    pub technologies: Vec<String>,
    pub keywords: Vec<String>,
}

/// Persistence port for knowledge entries.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn fetch(
        &self,
        kind: EntryKind,
        query: &KnowledgeQuery,
    ) -> Result<Vec<KnowledgeEntry>, KnowledgeError>;

    async fn save(&self, entry: KnowledgeEntry) -> Result<(), KnowledgeError>;
}

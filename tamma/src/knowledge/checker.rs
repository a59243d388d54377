//! Pre-task checker: scores prohibitions, recommendations, and learnings
//! against the task and plan before any implementation starts.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::types::{DevelopmentPlan, TaskType};

use super::matchers::{combine_scores, keyword_score, pattern_score};
use super::{EntryKind, KnowledgeEntry, KnowledgeError, KnowledgeQuery, KnowledgeStore, Priority};

/// Task identity the checker needs beyond the plan.
#[derive(Clone, Debug, Default)]
pub struct TaskContext {
    pub task_type: TaskType,
    pub description: String,
    pub project_id: Option<String>,
    pub agent_type: String,
}

/// Checker tuning.
#[derive(Clone, Debug, Serialize)]
pub struct CheckerConfig {
    /// Entries scoring below this are dropped.
    pub score_threshold: f32,
    /// Critical prohibitions become blockers instead of warnings.
    pub block_on_critical: bool,
    pub max_recommendations: usize,
    pub max_learnings: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.2,
            block_on_critical: true,
            max_recommendations: 5,
            max_learnings: 5,
        }
    }
}

/// An entry that survived scoring.
#[derive(Clone, Debug, Serialize)]
pub struct MatchedEntry {
    pub entry: KnowledgeEntry,
    pub score: f32,
}

/// Outcome of the pre-task check.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CheckResult {
    pub can_proceed: bool,
    pub blockers: Vec<MatchedEntry>,
    pub warnings: Vec<MatchedEntry>,
    pub recommendations: Vec<MatchedEntry>,
    pub learnings: Vec<MatchedEntry>,
}

/// File-extension → technology map plus an approach keyword scan.
fn infer_technologies(file_paths: &[String], approach: &str) -> Vec<String> {
    const EXT_MAP: &[(&str, &str)] = &[
        ("rs", "rust"),
        ("ts", "typescript"),
        ("tsx", "typescript"),
        ("js", "javascript"),
        ("py", "python"),
        ("go", "go"),
        ("java", "java"),
        ("rb", "ruby"),
        ("sql", "sql"),
        ("md", "markdown"),
        ("yml", "yaml"),
        ("yaml", "yaml"),
        ("toml", "toml"),
        ("sh", "shell"),
    ];
    const KEYWORDS: &[&str] = &[
        "tokio", "react", "postgres", "sqlite", "redis", "docker", "kubernetes", "graphql",
        "grpc", "websocket", "oauth",
    ];

    let mut out: Vec<String> = Vec::new();
    for path in file_paths {
        let Some(ext) = path.rsplit('.').next() else {
            continue;
        };
        if let Some((_, tech)) = EXT_MAP.iter().find(|(e, _)| *e == ext) {
            if !out.contains(&tech.to_string()) {
                out.push(tech.to_string());
            }
        }
    }
    let lower = approach.to_lowercase();
    for keyword in KEYWORDS {
        if lower.contains(keyword) && !out.contains(&keyword.to_string()) {
            out.push(keyword.to_string());
        }
    }
    out
}

fn query_keywords(context: &TaskContext, plan: &DevelopmentPlan) -> Vec<String> {
    let mut keywords = crate::source::tokenize(&context.description);
    keywords.extend(crate::source::tokenize(&plan.summary));
    keywords.extend(crate::source::tokenize(&plan.approach));
    keywords.sort();
    keywords.dedup();
    keywords
}

/// Runs the knowledge check before approval/implementation.
pub struct PreTaskChecker {
    store: Arc<dyn KnowledgeStore>,
    config: CheckerConfig,
}

impl PreTaskChecker {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: CheckerConfig) -> Self {
        Self { store, config }
    }

    /// Builds the query the store and the matchers both see.
    pub fn build_query(context: &TaskContext, plan: &DevelopmentPlan) -> KnowledgeQuery {
        let file_paths: Vec<String> =
            plan.file_changes.iter().map(|fc| fc.path.clone()).collect();
        KnowledgeQuery {
            task_type: context.task_type,
            description: context.description.clone(),
            project_id: context.project_id.clone(),
            agent_type: context.agent_type.clone(),
            technologies: infer_technologies(&file_paths, &plan.approach),
            keywords: query_keywords(context, plan),
            file_paths,
        }
    }

    fn score_entries(
        &self,
        entries: Vec<KnowledgeEntry>,
        query: &KnowledgeQuery,
    ) -> Vec<MatchedEntry> {
        let mut matched: Vec<MatchedEntry> = entries
            .into_iter()
            .filter_map(|entry| {
                let keyword = keyword_score(&entry.keywords, &query.keywords);
                let pattern = pattern_score(&entry.patterns, &query.file_paths);
                let score = combine_scores(keyword, pattern);
                if score >= self.config.score_threshold {
                    Some(MatchedEntry { entry, score })
                } else {
                    None
                }
            })
            .collect();
        matched.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        matched
    }

    pub async fn check(
        &self,
        context: &TaskContext,
        plan: &DevelopmentPlan,
    ) -> Result<CheckResult, KnowledgeError> {
        let query = Self::build_query(context, plan);

        let prohibitions = self.store.fetch(EntryKind::Prohibition, &query).await?;
        let recommendations = self.store.fetch(EntryKind::Recommendation, &query).await?;
        let learnings = self.store.fetch(EntryKind::Learning, &query).await?;

        let mut blockers = Vec::new();
        let mut warnings = Vec::new();
        for matched in self.score_entries(prohibitions, &query) {
            if matched.entry.priority == Priority::Critical && self.config.block_on_critical {
                blockers.push(matched);
            } else {
                warnings.push(matched);
            }
        }

        let mut recommendations = self.score_entries(recommendations, &query);
        recommendations.truncate(self.config.max_recommendations);
        let mut learnings = self.score_entries(learnings, &query);
        learnings.truncate(self.config.max_learnings);

        let result = CheckResult {
            can_proceed: blockers.is_empty(),
            blockers,
            warnings,
            recommendations,
            learnings,
        };
        debug!(
            can_proceed = result.can_proceed,
            blockers = result.blockers.len(),
            warnings = result.warnings.len(),
            "pre-task check complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::test_support::{entry, MockKnowledgeStore};
    use crate::types::{Complexity, FileAction, FileChange};

    fn plan() -> DevelopmentPlan {
        DevelopmentPlan {
            issue_number: 42,
            summary: "harden session token validation".into(),
            approach: "rework token checks in the auth module using tokio tasks".into(),
            file_changes: vec![FileChange {
                path: "src/auth/session.rs".into(),
                action: FileAction::Modify,
                description: "tighten validation".into(),
            }],
            testing_strategy: "unit tests".into(),
            estimated_complexity: Complexity::Low,
            risks: vec![],
        }
    }

    fn context() -> TaskContext {
        TaskContext {
            task_type: TaskType::BugFix,
            description: "session token validation bypass".into(),
            project_id: None,
            agent_type: "engine".into(),
        }
    }

    /// **Scenario**: a critical prohibition matching the touched files
    /// becomes a blocker and stops the task.
    #[tokio::test]
    async fn critical_prohibition_blocks() {
        let store = Arc::new(MockKnowledgeStore::with_entries(vec![entry(
            "p1",
            EntryKind::Prohibition,
            Priority::Critical,
            "never weaken token validation",
            &["token", "validation", "session"],
            &["src/auth/**"],
        )]));
        let checker = PreTaskChecker::new(store, CheckerConfig::default());
        let result = checker.check(&context(), &plan()).await.unwrap();
        assert!(!result.can_proceed);
        assert_eq!(result.blockers.len(), 1);
        assert!(result.warnings.is_empty());
    }

    /// **Scenario**: non-critical prohibitions warn instead of blocking.
    #[tokio::test]
    async fn high_priority_prohibition_warns() {
        let store = Arc::new(MockKnowledgeStore::with_entries(vec![entry(
            "p2",
            EntryKind::Prohibition,
            Priority::High,
            "avoid touching session code on fridays",
            &["session", "token"],
            &["src/auth/**"],
        )]));
        let checker = PreTaskChecker::new(store, CheckerConfig::default());
        let result = checker.check(&context(), &plan()).await.unwrap();
        assert!(result.can_proceed);
        assert_eq!(result.warnings.len(), 1);
    }

    /// **Scenario**: unrelated entries score below threshold and drop out.
    #[tokio::test]
    async fn unrelated_entries_filtered() {
        let store = Arc::new(MockKnowledgeStore::with_entries(vec![entry(
            "r1",
            EntryKind::Recommendation,
            Priority::Medium,
            "prefer streaming uploads",
            &["upload", "multipart"],
            &["src/storage/**"],
        )]));
        let checker = PreTaskChecker::new(store, CheckerConfig::default());
        let result = checker.check(&context(), &plan()).await.unwrap();
        assert!(result.recommendations.is_empty());
        assert!(result.can_proceed);
    }

    /// **Scenario**: the built query infers technologies from extensions and
    /// the approach text.
    #[test]
    fn technology_inference() {
        let query = PreTaskChecker::build_query(&context(), &plan());
        assert!(query.technologies.contains(&"rust".to_string()));
        assert!(query.technologies.contains(&"tokio".to_string()));
        assert!(query.keywords.contains(&"session".to_string()));
        assert_eq!(query.file_paths, vec!["src/auth/session.rs".to_string()]);
    }
}

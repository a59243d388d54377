//! Learning capture: turn task outcomes into knowledge entries, skipping
//! duplicates.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::duplicate::DuplicateDetector;
use super::{EntryKind, KnowledgeEntry, KnowledgeError, KnowledgeQuery, KnowledgeStore, Priority};

/// Outcome summary handed to the capture templates.
#[derive(Clone, Debug)]
pub struct TaskOutcome {
    pub task_description: String,
    pub summary: String,
    pub file_paths: Vec<String>,
    pub retries: u32,
    pub cost_usd: f64,
}

/// Captures learnings through the knowledge store.
pub struct LearningCapture {
    store: Arc<dyn KnowledgeStore>,
    detector: DuplicateDetector,
}

impl LearningCapture {
    pub fn new(store: Arc<dyn KnowledgeStore>, detector: DuplicateDetector) -> Self {
        Self { store, detector }
    }

    fn keywords_for(outcome: &TaskOutcome) -> Vec<String> {
        let mut keywords = crate::source::tokenize(&outcome.task_description);
        keywords.extend(crate::source::tokenize(&outcome.summary));
        keywords.sort();
        keywords.dedup();
        keywords
    }

    async fn capture(
        &self,
        title: String,
        description: String,
        outcome: &TaskOutcome,
        priority: Priority,
    ) -> Result<Option<String>, KnowledgeError> {
        let keywords = Self::keywords_for(outcome);
        let query = KnowledgeQuery {
            description: outcome.task_description.clone(),
            keywords: keywords.clone(),
            file_paths: outcome.file_paths.clone(),
            ..Default::default()
        };
        let existing = self.store.fetch(EntryKind::Learning, &query).await?;
        if let Some(duplicate) = self.detector.find_duplicate(&title, &keywords, &existing) {
            debug!(duplicate = %duplicate.id, "learning already captured");
            return Ok(None);
        }

        let entry = KnowledgeEntry {
            id: Uuid::new_v4().to_string(),
            kind: EntryKind::Learning,
            priority,
            title,
            description,
            keywords,
            patterns: outcome.file_paths.clone(),
            project_id: None,
        };
        let id = entry.id.clone();
        self.store.save(entry).await?;
        info!(id = %id, "learning captured");
        Ok(Some(id))
    }

    /// Success template: what worked and at what cost.
    pub async fn capture_success(
        &self,
        outcome: &TaskOutcome,
    ) -> Result<Option<String>, KnowledgeError> {
        let title = format!("completed: {}", outcome.task_description);
        let description = format!(
            "Task completed. {} Touched {} file(s); {} retr{}; cost ${:.2}.",
            outcome.summary,
            outcome.file_paths.len(),
            outcome.retries,
            if outcome.retries == 1 { "y" } else { "ies" },
            outcome.cost_usd,
        );
        self.capture(title, description, outcome, Priority::Low).await
    }

    /// Failure template: what went wrong, kept at higher priority so it
    /// surfaces in later checks.
    pub async fn capture_failure(
        &self,
        outcome: &TaskOutcome,
        error: &str,
    ) -> Result<Option<String>, KnowledgeError> {
        let title = format!("failed: {}", outcome.task_description);
        let description = format!(
            "Task failed after {} retr{}: {error}. {}",
            outcome.retries,
            if outcome.retries == 1 { "y" } else { "ies" },
            outcome.summary,
        );
        self.capture(title, description, outcome, Priority::Medium)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::test_support::MockKnowledgeStore;

    fn outcome() -> TaskOutcome {
        TaskOutcome {
            task_description: "fix authentication bug".into(),
            summary: "Tightened token expiry checks.".into(),
            file_paths: vec!["src/auth.rs".into()],
            retries: 1,
            cost_usd: 0.42,
        }
    }

    /// **Scenario**: a success capture stores one learning entry.
    #[tokio::test]
    async fn success_captures_entry() {
        let store = Arc::new(MockKnowledgeStore::default());
        let capture = LearningCapture::new(Arc::clone(&store) as _, DuplicateDetector::default());
        let id = capture.capture_success(&outcome()).await.unwrap();
        assert!(id.is_some());
        let entries = store.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Learning);
        assert!(entries[0].title.contains("fix authentication bug"));
    }

    /// **Scenario**: capturing the same outcome twice stores only one entry.
    #[tokio::test]
    async fn duplicate_capture_skipped() {
        let store = Arc::new(MockKnowledgeStore::default());
        let capture = LearningCapture::new(Arc::clone(&store) as _, DuplicateDetector::default());
        assert!(capture.capture_success(&outcome()).await.unwrap().is_some());
        assert!(capture.capture_success(&outcome()).await.unwrap().is_none());
        assert_eq!(store.entries.lock().unwrap().len(), 1);
    }

    /// **Scenario**: failures capture at medium priority with the error in
    /// the description.
    #[tokio::test]
    async fn failure_captures_priority() {
        let store = Arc::new(MockKnowledgeStore::default());
        let capture = LearningCapture::new(Arc::clone(&store) as _, DuplicateDetector::default());
        capture
            .capture_failure(&outcome(), "CI never went green")
            .await
            .unwrap();
        let entries = store.entries.lock().unwrap();
        assert_eq!(entries[0].priority, Priority::Medium);
        assert!(entries[0].description.contains("CI never went green"));
    }
}

//! Platform abstraction: repo, branch, issue, PR, and CI operations behind
//! one port, with rate-limit-aware retry.

mod github;

pub use github::GitHubPlatform;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ErrorCategory;
use crate::types::{Branch, CiState, CiStatus, Commit, Issue, PullRequest, Repository};

/// Errors from platform operations.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("platform unavailable: {0}")]
    Unavailable(String),
    #[error("{operation}: http {status}: {message}")]
    Http {
        operation: String,
        status: u16,
        message: String,
    },
    #[error("{operation}: rate limited")]
    RateLimited { operation: String },
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{operation}: decode: {message}")]
    Decode { operation: String, message: String },
}

impl PlatformError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlatformError::Unavailable(_)
            | PlatformError::RateLimited { .. }
            | PlatformError::Request(_) => ErrorCategory::Transient,
            PlatformError::Http { status, .. } if is_retryable_status(*status) => {
                ErrorCategory::Transient
            }
            PlatformError::Http { .. } | PlatformError::Decode { .. } => ErrorCategory::Protocol,
            PlatformError::NotFound(_) => ErrorCategory::Business,
        }
    }

    /// Whether a retry could help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited { .. } | PlatformError::Request(_)
        ) || matches!(self, PlatformError::Http { status, .. } if is_retryable_status(*status))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

/// Default retry attempts budget for platform calls.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Runs `op` with retries on transient failures: HTTP 429/502/503/504,
/// detected rate limiting, and connection errors. Exponential backoff
/// between attempts, capped by the small attempts budget.
pub async fn with_rate_limit<T, F, Fut>(
    operation: &str,
    attempts: u32,
    op: F,
) -> Result<T, PlatformError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, PlatformError>>,
{
    let attempts = attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = Duration::from_millis(500 * (1 << (attempt - 1)));
                warn!(operation, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying platform call");
                tokio::time::sleep(delay).await;
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or(PlatformError::Unavailable(operation.to_string())))
}

/// One CI check outcome, whatever its provenance (status or check run).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    Success,
    Failure,
    Pending,
}

/// Combines statuses and check runs: failure if any failed, else pending if
/// any pending, else success (the empty case counts as success).
pub fn combine_ci(outcomes: &[CheckOutcome]) -> CiStatus {
    let total = outcomes.len();
    let success = outcomes
        .iter()
        .filter(|o| **o == CheckOutcome::Success)
        .count();
    let failure = outcomes
        .iter()
        .filter(|o| **o == CheckOutcome::Failure)
        .count();
    let pending = outcomes
        .iter()
        .filter(|o| **o == CheckOutcome::Pending)
        .count();
    let state = if failure > 0 {
        CiState::Failure
    } else if pending > 0 {
        CiState::Pending
    } else {
        CiState::Success
    };
    CiStatus {
        state,
        total,
        success,
        failure,
        pending,
    }
}

/// Filter for `list_issues`.
#[derive(Clone, Debug, Default)]
pub struct IssueFilter {
    /// Issues must carry all of these labels.
    pub labels: Vec<String>,
    /// Open issues only when true (the engine's default).
    pub open_only: bool,
}

/// Mutation for `update_issue`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IssueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

/// Inputs for `create_pr`.
#[derive(Clone, Debug)]
pub struct CreatePullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub labels: Vec<String>,
}

/// Mutation for `update_pr`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PullRequestUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Merge strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    #[default]
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

/// The platform port. Every implementation routes calls through
/// [`with_rate_limit`].
#[async_trait]
pub trait GitPlatform: Send + Sync {
    async fn get_repository(&self) -> Result<Repository, PlatformError>;

    /// `None` when the branch does not exist.
    async fn get_branch(&self, name: &str) -> Result<Option<Branch>, PlatformError>;

    async fn create_branch(&self, name: &str, from: &str) -> Result<Branch, PlatformError>;

    async fn delete_branch(&self, name: &str) -> Result<(), PlatformError>;

    async fn get_issue(&self, number: u64) -> Result<Issue, PlatformError>;

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, PlatformError>;

    async fn update_issue(&self, number: u64, update: &IssueUpdate)
        -> Result<(), PlatformError>;

    async fn add_issue_comment(&self, number: u64, body: &str) -> Result<(), PlatformError>;

    async fn assign_issue(&self, number: u64, assignee: &str) -> Result<(), PlatformError>;

    async fn create_pr(&self, request: &CreatePullRequest)
        -> Result<PullRequest, PlatformError>;

    async fn get_pr(&self, number: u64) -> Result<PullRequest, PlatformError>;

    async fn update_pr(
        &self,
        number: u64,
        update: &PullRequestUpdate,
    ) -> Result<PullRequest, PlatformError>;

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), PlatformError>;

    async fn add_pr_comment(&self, number: u64, body: &str) -> Result<(), PlatformError>;

    async fn get_ci_status(&self, sha: &str) -> Result<CiStatus, PlatformError>;

    async fn list_commits(&self, branch: &str, limit: usize)
        -> Result<Vec<Commit>, PlatformError>;
}

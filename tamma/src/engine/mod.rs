//! The issue-to-merge engine: one issue lifecycle per iteration, from
//! selection through merge, with failure recovery back to idle.

mod branch;
mod prompts;
mod state;

pub use branch::{branch_name, slugify, unique_branch_name};
pub use prompts::{implement_prompt, parse_plan, plan_prompt, plan_schema};
pub use state::{
    ApprovalGate, EngineContext, EngineEvent, EngineState, EventBus, IterationOutcome,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregator::ContextAggregator;
use crate::error::ErrorCategory;
use crate::platform::{
    CreatePullRequest, GitPlatform, IssueFilter, IssueState, IssueUpdate, MergeMethod,
    PlatformError,
};
use crate::provider::{
    AgentProvider, AgentSettings, ProgressCallback, ProviderError, TaskResult,
};
use crate::types::{
    CiState, ContextRequest, DevelopmentPlan, Issue, PullRequest, Repository, TaskType,
};

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("plan generation failed: {0}")]
    PlanGeneration(String),
    #[error("implementation failed: {0}")]
    ImplementationFailed(String),
    #[error("ci failed for pr #{pr}")]
    CiFailed { pr: u64 },
    #[error("ci did not finish within {timeout_secs}s for pr #{pr}")]
    CiTimeout { pr: u64, timeout_secs: u64 },
    #[error("approval denied for issue #{0}")]
    ApprovalDenied(u64),
    #[error("cost limit exceeded: spent ${spent:.2} of ${limit:.2}")]
    CostLimitExceeded { spent: f64, limit: f64 },
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Provider(ProviderError),
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::PlanGeneration(_)
            | EngineError::ImplementationFailed(_)
            | EngineError::CiFailed { .. }
            | EngineError::CiTimeout { .. }
            | EngineError::ApprovalDenied(_) => ErrorCategory::Business,
            EngineError::CostLimitExceeded { .. } => ErrorCategory::ResourceLimit,
            EngineError::Platform(e) => e.category(),
            EngineError::Provider(e) => e.category(),
            EngineError::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

fn map_provider(e: ProviderError) -> EngineError {
    match e {
        ProviderError::Cancelled => EngineError::Cancelled,
        other => EngineError::Provider(other),
    }
}

/// How approvals resolve before implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    #[default]
    Auto,
    Manual,
}

/// Engine configuration; the `engine` + `platform` behavioural knobs.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub ci_timeout: Duration,
    pub working_directory: PathBuf,
    pub max_retries: u32,
    pub approval_mode: ApprovalMode,
    pub issue_labels: Vec<String>,
    pub exclude_labels: Vec<String>,
    pub bot_username: Option<String>,
    pub merge_method: MergeMethod,
    pub pr_labels: Vec<String>,
    pub dry_run: bool,
    pub agent: AgentSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            ci_timeout: Duration::from_secs(1800),
            working_directory: PathBuf::from("."),
            max_retries: 3,
            approval_mode: ApprovalMode::Auto,
            issue_labels: Vec::new(),
            exclude_labels: Vec::new(),
            bot_username: None,
            merge_method: MergeMethod::Squash,
            pr_labels: Vec::new(),
            dry_run: false,
            agent: AgentSettings::default(),
        }
    }
}

/// Conventional-commit prefix for the PR title, from the issue labels.
fn pr_prefix(issue: &Issue) -> &'static str {
    let has = |needle: &str| issue.labels.iter().any(|l| l.eq_ignore_ascii_case(needle));
    if has("bug") {
        "fix"
    } else if has("chore") || has("documentation") || has("docs") {
        "chore"
    } else {
        "feat"
    }
}

/// Retrieval task type for an issue, from its labels.
fn task_type_for(issue: &Issue) -> TaskType {
    let has = |needle: &str| issue.labels.iter().any(|l| l.eq_ignore_ascii_case(needle));
    if has("bug") {
        TaskType::BugFix
    } else if has("documentation") || has("docs") {
        TaskType::Documentation
    } else if has("refactor") {
        TaskType::Refactoring
    } else {
        TaskType::CodeGeneration
    }
}

/// Shared implementation step: prompt from the plan, streamed through the
/// provider. The supervisor drives the same path when retrying with review
/// feedback.
pub async fn run_implementation(
    provider: &dyn AgentProvider,
    settings: &AgentSettings,
    plan: &DevelopmentPlan,
    branch: &str,
    working_dir: &Path,
    resume_session: Option<String>,
    feedback: Option<&str>,
    progress: Option<ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<TaskResult, EngineError> {
    let prompt = implement_prompt(
        plan,
        branch,
        &working_dir.display().to_string(),
        feedback,
    );
    let mut config = settings.task_config(prompt, working_dir.to_path_buf());
    config.resume_session = resume_session;
    let result = provider
        .execute_task(config, progress, cancel)
        .await
        .map_err(map_provider)?;
    if !result.success {
        return Err(EngineError::ImplementationFailed(
            result
                .error
                .unwrap_or_else(|| "agent reported failure".into()),
        ));
    }
    Ok(result)
}

/// The engine. Owns exactly one issue at a time; state transitions are
/// serial, and every iteration starts from a fresh context.
pub struct Engine {
    platform: Arc<dyn GitPlatform>,
    provider: Arc<dyn AgentProvider>,
    aggregator: Option<Arc<ContextAggregator>>,
    config: EngineConfig,
    context: EngineContext,
    events: Arc<EventBus>,
    approval: ApprovalGate,
}

impl Engine {
    pub fn new(
        platform: Arc<dyn GitPlatform>,
        provider: Arc<dyn AgentProvider>,
        aggregator: Option<Arc<ContextAggregator>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            platform,
            provider,
            aggregator,
            config,
            context: EngineContext::default(),
            events: Arc::new(EventBus::default()),
            approval: ApprovalGate::default(),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Handle for resolving manual approvals from outside the loop.
    pub fn approval_gate(&self) -> ApprovalGate {
        self.approval.clone()
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn transition(&mut self, to: EngineState) {
        let from = self.context.state;
        self.context.state = to;
        info!(?from, ?to, "engine transition");
        self.events.emit(&EngineEvent::StateChanged { from, to });
    }

    /// Continuous loop: one issue at a time, sleeping the poll interval when
    /// idle, surviving per-iteration failures. Returns on cancellation.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), EngineError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let wait = match self.run_once(cancel).await {
                Ok(IterationOutcome::NoWork) => true,
                Ok(_) => false,
                Err(EngineError::Cancelled) => return Ok(()),
                Err(e) => {
                    error!(error = %e, "iteration failed; continuing after poll interval");
                    true
                }
            };
            if wait {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
    }

    /// One full iteration. On error the context is recorded and reset so the
    /// next iteration starts clean.
    pub async fn run_once(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<IterationOutcome, EngineError> {
        let result = self.iterate(cancel).await;
        if let Err(e) = &result {
            let state = self.context.state();
            self.events.emit(&EngineEvent::Error {
                state,
                message: e.to_string(),
            });
        }
        let from = self.context.state();
        self.context.reset();
        if from != EngineState::Idle {
            self.events.emit(&EngineEvent::StateChanged {
                from,
                to: EngineState::Idle,
            });
        }
        result
    }

    /// Dry-run planning for one specific issue; no platform mutations.
    pub async fn plan_issue(
        &mut self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<DevelopmentPlan, EngineError> {
        let issue = self.platform.get_issue(number).await?;
        self.context.current_issue = Some(issue.clone());
        self.transition(EngineState::Analyzing);
        let analysis = self.analyze_issue(&issue).await;
        let context_text = self.fetch_context(&issue, cancel).await;
        let plan = self
            .generate_plan(&issue, &analysis, context_text.as_deref(), cancel)
            .await;
        self.context.reset();
        plan
    }

    async fn iterate(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<IterationOutcome, EngineError> {
        let Some(issue) = self.select_issue(cancel).await? else {
            return Ok(IterationOutcome::NoWork);
        };

        self.transition(EngineState::Analyzing);
        let analysis = self.analyze_issue(&issue).await;
        let context_text = self.fetch_context(&issue, cancel).await;

        let plan = self
            .generate_plan(&issue, &analysis, context_text.as_deref(), cancel)
            .await?;
        if self.config.dry_run {
            return Ok(IterationOutcome::PlanOnly(plan));
        }

        self.await_approval(&issue, cancel).await?;

        let repo = self.platform.get_repository().await?;
        let branch = self.create_branch(&issue, &repo).await?;
        self.implement_code(&plan, &branch, cancel).await?;
        let pr = self.create_pr(&issue, &plan, &branch, &repo).await?;
        self.monitor_and_merge(&issue, &pr, &branch, cancel).await?;

        self.transition(EngineState::Completed);
        Ok(IterationOutcome::Completed {
            issue: issue.number,
            pr: pr.number,
        })
    }

    /// Picks the oldest open issue carrying every include label and none of
    /// the exclude labels. Returns `None` (and goes back to idle) when no
    /// issue qualifies.
    async fn select_issue(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Issue>, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.transition(EngineState::SelectingIssue);
        let filter = IssueFilter {
            labels: self.config.issue_labels.clone(),
            open_only: true,
        };
        let mut issues = self.platform.list_issues(&filter).await?;
        issues.retain(|issue| {
            let has_all = self
                .config
                .issue_labels
                .iter()
                .all(|l| issue.labels.contains(l));
            let has_excluded = self
                .config
                .exclude_labels
                .iter()
                .any(|l| issue.labels.contains(l));
            has_all && !has_excluded
        });
        issues.sort_by_key(|issue| issue.created_at);

        let Some(issue) = issues.into_iter().next() else {
            return Ok(None);
        };

        if !self.config.dry_run {
            if let Some(bot) = &self.config.bot_username {
                if let Err(e) = self.platform.assign_issue(issue.number, bot).await {
                    warn!(issue = issue.number, error = %e, "assigning bot user failed");
                }
            }
            self.platform
                .add_issue_comment(
                    issue.number,
                    "Tamma has started working on this issue.",
                )
                .await?;
        }
        self.events.emit(&EngineEvent::IssueSelected {
            number: issue.number,
            title: issue.title.clone(),
        });
        self.context.current_issue = Some(issue.clone());
        Ok(Some(issue))
    }

    /// Text context: body, discussion, and resolved `#n` references.
    async fn analyze_issue(&self, issue: &Issue) -> String {
        let mut text = issue.body.clone();
        if !issue.comments.is_empty() {
            text.push_str("\n\nDiscussion:\n");
            for comment in &issue.comments {
                text.push_str(&format!("[{}]: {}\n", comment.author, comment.body));
            }
        }
        if !issue.related.is_empty() {
            text.push_str("\nReferenced issues:\n");
            for number in issue.related.iter().take(5) {
                match self.platform.get_issue(*number).await {
                    Ok(related) => {
                        text.push_str(&format!("#{}: {}\n", related.number, related.title))
                    }
                    Err(e) => warn!(reference = number, error = %e, "reference lookup failed"),
                }
            }
        }
        text
    }

    /// Retrieved context for planning; failures degrade to no context.
    async fn fetch_context(&self, issue: &Issue, cancel: &CancellationToken) -> Option<String> {
        let aggregator = self.aggregator.as_ref()?;
        let query = format!("{} {}", issue.title, issue.body);
        let request = ContextRequest::new(query, task_type_for(issue), 6_000);
        match aggregator.get_context(&request, cancel).await {
            Ok(response) => Some(response.text),
            Err(e) => {
                warn!(issue = issue.number, error = %e, "context retrieval failed; planning without it");
                None
            }
        }
    }

    async fn generate_plan(
        &mut self,
        issue: &Issue,
        analysis: &str,
        context: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DevelopmentPlan, EngineError> {
        self.transition(EngineState::GeneratingPlan);
        let mut config = self.config.agent.task_config(
            plan_prompt(issue, analysis, context),
            self.config.working_directory.clone(),
        );
        config.json_schema = Some(plan_schema());
        let result = self
            .provider
            .execute_task(config, None, cancel)
            .await
            .map_err(map_provider)?;
        if !result.success {
            return Err(EngineError::PlanGeneration(
                result.error.unwrap_or_else(|| "agent reported failure".into()),
            ));
        }
        let plan = parse_plan(&result.output, issue.number)
            .ok_or_else(|| EngineError::PlanGeneration("unparseable plan output".into()))?;
        self.context.agent_session_id = result.session_id;
        self.context.current_plan = Some(plan.clone());
        self.events.emit(&EngineEvent::PlanGenerated {
            issue: issue.number,
            summary: plan.summary.clone(),
            complexity: plan.estimated_complexity,
        });
        Ok(plan)
    }

    /// No-op in auto mode; in manual mode, blocks until the gate resolves.
    async fn await_approval(
        &mut self,
        issue: &Issue,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.transition(EngineState::AwaitingApproval);
        match self.config.approval_mode {
            ApprovalMode::Auto => Ok(()),
            ApprovalMode::Manual => {
                let rx = self.approval.arm();
                self.events.emit(&EngineEvent::AwaitingApproval {
                    issue: issue.number,
                });
                let approved = tokio::select! {
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    resolved = rx => resolved.unwrap_or(false),
                };
                if approved {
                    Ok(())
                } else {
                    Err(EngineError::ApprovalDenied(issue.number))
                }
            }
        }
    }

    async fn create_branch(
        &mut self,
        issue: &Issue,
        repo: &Repository,
    ) -> Result<String, EngineError> {
        self.transition(EngineState::CreatingBranch);
        let nominal = branch_name(issue.number, &issue.title);
        let name = unique_branch_name(self.platform.as_ref(), &nominal).await?;
        self.platform
            .create_branch(&name, &repo.default_branch)
            .await?;
        self.context.current_branch = Some(name.clone());
        self.events.emit(&EngineEvent::BranchCreated { name: name.clone() });
        Ok(name)
    }

    async fn implement_code(
        &mut self,
        plan: &DevelopmentPlan,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, EngineError> {
        self.transition(EngineState::Implementing);
        let bus = Arc::clone(&self.events);
        let progress: ProgressCallback =
            Arc::new(move |event| bus.emit(&EngineEvent::Progress(event)));
        let result = run_implementation(
            self.provider.as_ref(),
            &self.config.agent,
            plan,
            branch,
            &self.config.working_directory,
            self.context.agent_session_id.clone(),
            None,
            Some(progress),
            cancel,
        )
        .await?;
        if let Some(session) = &result.session_id {
            self.context.agent_session_id = Some(session.clone());
        }
        Ok(result)
    }

    async fn create_pr(
        &mut self,
        issue: &Issue,
        plan: &DevelopmentPlan,
        branch: &str,
        repo: &Repository,
    ) -> Result<PullRequest, EngineError> {
        self.transition(EngineState::CreatingPr);
        let title = format!("{}: {} (#{})", pr_prefix(issue), plan.summary, issue.number);
        let mut body = format!("Closes #{}\n\n## Plan\n{}\n", issue.number, plan.summary);
        if !plan.risks.is_empty() {
            body.push_str("\n### Risks\n");
            for risk in &plan.risks {
                body.push_str(&format!("- {risk}\n"));
            }
        }
        let pr = self
            .platform
            .create_pr(&CreatePullRequest {
                title,
                body,
                head: branch.to_string(),
                base: repo.default_branch.clone(),
                labels: self.config.pr_labels.clone(),
            })
            .await?;
        self.context.current_pr = Some(pr.clone());
        self.events.emit(&EngineEvent::PrOpened {
            number: pr.number,
            url: pr.url.clone(),
        });
        Ok(pr)
    }

    /// Polls CI until success, failure, or the wall-clock deadline. On
    /// success, merges, deletes the branch, and closes the issue. CI failure
    /// and timeout leave the PR intact for a human.
    async fn monitor_and_merge(
        &mut self,
        issue: &Issue,
        pr: &PullRequest,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.transition(EngineState::MonitoringPr);
        let deadline = Instant::now() + self.config.ci_timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let current = self.platform.get_pr(pr.number).await?;
            let status = self.platform.get_ci_status(&current.head_sha).await?;
            self.events.emit(&EngineEvent::CiPoll {
                pr: pr.number,
                state: status.state,
            });

            match status.state {
                CiState::Failure | CiState::Error => {
                    return Err(EngineError::CiFailed { pr: pr.number });
                }
                CiState::Success if current.mergeable != Some(false) => {
                    self.platform
                        .merge_pr(pr.number, self.config.merge_method)
                        .await?;
                    self.events.emit(&EngineEvent::Merged { pr: pr.number });
                    if let Err(e) = self.platform.delete_branch(branch).await {
                        warn!(branch, error = %e, "branch delete failed after merge");
                    }
                    self.platform
                        .update_issue(
                            issue.number,
                            &IssueUpdate {
                                state: Some(IssueState::Closed),
                                title: None,
                            },
                        )
                        .await?;
                    self.platform
                        .add_issue_comment(
                            issue.number,
                            &format!("Completed in #{}.", pr.number),
                        )
                        .await?;
                    self.events.emit(&EngineEvent::IssueClosed {
                        number: issue.number,
                    });
                    return Ok(());
                }
                // Pending, or success with mergeability still unsettled.
                _ => {
                    if Instant::now() >= deadline {
                        return Err(EngineError::CiTimeout {
                            pr: pr.number,
                            timeout_secs: self.config.ci_timeout.as_secs(),
                        });
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn issue_with_labels(labels: &[&str]) -> Issue {
        Issue {
            number: 1,
            title: "t".into(),
            body: String::new(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            assignees: vec![],
            url: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            comments: vec![],
            related: vec![],
        }
    }

    /// **Scenario**: PR title prefix follows the issue labels.
    #[test]
    fn pr_prefix_from_labels() {
        assert_eq!(pr_prefix(&issue_with_labels(&["bug"])), "fix");
        assert_eq!(pr_prefix(&issue_with_labels(&["docs"])), "chore");
        assert_eq!(pr_prefix(&issue_with_labels(&["tamma"])), "feat");
    }

    /// **Scenario**: task type derives from labels, defaulting to code
    /// generation.
    #[test]
    fn task_type_from_labels() {
        assert_eq!(task_type_for(&issue_with_labels(&["bug"])), TaskType::BugFix);
        assert_eq!(
            task_type_for(&issue_with_labels(&["refactor"])),
            TaskType::Refactoring
        );
        assert_eq!(
            task_type_for(&issue_with_labels(&[])),
            TaskType::CodeGeneration
        );
    }

    /// **Scenario**: cancelled provider errors map to engine cancellation.
    #[test]
    fn provider_cancel_maps() {
        assert!(matches!(
            map_provider(ProviderError::Cancelled),
            EngineError::Cancelled
        ));
        assert!(matches!(
            map_provider(ProviderError::Unavailable("x".into())),
            EngineError::Provider(_)
        ));
    }
}

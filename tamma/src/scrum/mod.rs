//! Scrum-master supervisor: risk assessment, knowledge checks, approval,
//! bounded retry, review, and learning capture layered over the engine's
//! implementation step.

mod context;
mod review;
mod risk;

pub use context::{ScrumContext, ScrumEvent, ScrumEventKind, ScrumState, TaskInput};
pub use review::{review_implementation, ReviewConfig, ReviewOutcome};
pub use risk::{assess_risk, RiskLevel};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::{
    branch_name, parse_plan, plan_schema, run_implementation, EngineError,
};
use crate::error::ErrorCategory;
use crate::knowledge::{
    CheckResult, KnowledgeError, LearningCapture, PreTaskChecker, TaskContext, TaskOutcome,
};
use crate::provider::{AgentProvider, AgentSettings, TaskResult};
use crate::types::DevelopmentPlan;

/// Errors from supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum ScrumError {
    #[error("approval denied")]
    ApprovalDenied,
    #[error("retry budget exhausted after {0} attempts")]
    RetriesExhausted(u32),
    #[error("blocked by knowledge check: {0}")]
    Blocked(String),
    #[error("planning failed: {0}")]
    PlanningFailed(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
    #[error("user interface: {0}")]
    Ui(String),
    #[error("cancelled")]
    Cancelled,
}

impl ScrumError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ScrumError::ApprovalDenied
            | ScrumError::Blocked(_)
            | ScrumError::PlanningFailed(_)
            | ScrumError::Knowledge(_)
            | ScrumError::Ui(_) => ErrorCategory::Business,
            ScrumError::RetriesExhausted(_) => ErrorCategory::ResourceLimit,
            ScrumError::Engine(e) => e.category(),
            ScrumError::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// Produces the enriched plan for a task.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        task: &TaskInput,
        cancel: &CancellationToken,
    ) -> Result<DevelopmentPlan, ScrumError>;
}

/// Drives one implementation attempt.
#[async_trait]
pub trait ImplementationDriver: Send + Sync {
    async fn implement(
        &self,
        plan: &DevelopmentPlan,
        feedback: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, EngineError>;
}

/// Approval decision from whoever is watching.
#[derive(Clone, Debug)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub feedback: Option<String>,
}

/// Human (or automated) approval surface.
#[async_trait]
pub trait UserInterface: Send + Sync {
    async fn request_approval(
        &self,
        plan: &DevelopmentPlan,
        risk: RiskLevel,
        check: &CheckResult,
    ) -> Result<ApprovalDecision, ScrumError>;
}

/// Provider-backed planner: same coding agent, planning prompt + schema.
pub struct ProviderPlanner {
    provider: Arc<dyn AgentProvider>,
    settings: AgentSettings,
    working_dir: PathBuf,
}

impl ProviderPlanner {
    pub fn new(
        provider: Arc<dyn AgentProvider>,
        settings: AgentSettings,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            provider,
            settings,
            working_dir,
        }
    }
}

#[async_trait]
impl Planner for ProviderPlanner {
    async fn plan(
        &self,
        task: &TaskInput,
        cancel: &CancellationToken,
    ) -> Result<DevelopmentPlan, ScrumError> {
        let prompt = format!(
            "Produce a development plan as JSON matching the provided schema.\n\n\
             Task: {}\n\nRespond with only the JSON plan.",
            task.description
        );
        let mut config = self
            .settings
            .task_config(prompt, self.working_dir.clone());
        config.json_schema = Some(plan_schema());
        let result = self
            .provider
            .execute_task(config, None, cancel)
            .await
            .map_err(|e| ScrumError::PlanningFailed(e.to_string()))?;
        if !result.success {
            return Err(ScrumError::PlanningFailed(
                result.error.unwrap_or_else(|| "agent reported failure".into()),
            ));
        }
        parse_plan(&result.output, task.issue_number.unwrap_or(0))
            .ok_or_else(|| ScrumError::PlanningFailed("unparseable plan output".into()))
    }
}

/// Provider-backed implementation driver using the engine's shared
/// implementation step.
pub struct ProviderDriver {
    provider: Arc<dyn AgentProvider>,
    settings: AgentSettings,
    working_dir: PathBuf,
}

impl ProviderDriver {
    pub fn new(
        provider: Arc<dyn AgentProvider>,
        settings: AgentSettings,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            provider,
            settings,
            working_dir,
        }
    }
}

#[async_trait]
impl ImplementationDriver for ProviderDriver {
    async fn implement(
        &self,
        plan: &DevelopmentPlan,
        feedback: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, EngineError> {
        let branch = branch_name(plan.issue_number, &plan.summary);
        run_implementation(
            self.provider.as_ref(),
            &self.settings,
            plan,
            &branch,
            &self.working_dir,
            None,
            feedback,
            None,
            cancel,
        )
        .await
    }
}

/// Supervisor tuning.
#[derive(Clone, Debug)]
pub struct ScrumConfig {
    pub max_retries: u32,
    pub auto_approve_low_risk: bool,
    pub cost_limit_usd: f64,
    pub review: ReviewConfig,
}

impl Default for ScrumConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            auto_approve_low_risk: true,
            cost_limit_usd: 10.0,
            review: ReviewConfig::default(),
        }
    }
}

/// The supervisor. One task per `run_task` call; the returned context
/// carries the terminal state, errors, and the full event log.
pub struct ScrumMaster {
    planner: Arc<dyn Planner>,
    driver: Arc<dyn ImplementationDriver>,
    ui: Arc<dyn UserInterface>,
    checker: Option<Arc<PreTaskChecker>>,
    capture: Option<Arc<LearningCapture>>,
    config: ScrumConfig,
    paused: watch::Sender<bool>,
}

impl ScrumMaster {
    pub fn new(
        planner: Arc<dyn Planner>,
        driver: Arc<dyn ImplementationDriver>,
        ui: Arc<dyn UserInterface>,
        checker: Option<Arc<PreTaskChecker>>,
        capture: Option<Arc<LearningCapture>>,
        config: ScrumConfig,
    ) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            planner,
            driver,
            ui,
            checker,
            capture,
            config,
            paused,
        }
    }

    /// Pauses at the next stage boundary; context is preserved.
    pub fn pause(&self) {
        let _ = self.paused.send(true);
    }

    /// Resumes a paused task.
    pub fn resume(&self) {
        let _ = self.paused.send(false);
    }

    /// Blocks at stage boundaries while paused; `Paused` is entered and the
    /// previous state restored on resume.
    async fn boundary(
        &self,
        ctx: &mut ScrumContext,
        cancel: &CancellationToken,
    ) -> Result<(), ScrumError> {
        if cancel.is_cancelled() {
            return Err(ScrumError::Cancelled);
        }
        if !*self.paused.borrow() {
            return Ok(());
        }
        let resume_to = ctx.state;
        ctx.transition(ScrumState::Paused);
        let mut rx = self.paused.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ScrumError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() || !*rx.borrow() {
                        break;
                    }
                }
            }
        }
        ctx.transition(resume_to);
        Ok(())
    }

    /// Runs one task to a terminal state. All failures are recorded in the
    /// returned context; the context's state tells the story.
    pub async fn run_task(&self, task: TaskInput, cancel: &CancellationToken) -> ScrumContext {
        let mut ctx = ScrumContext::new(task);
        ctx.record(
            ScrumEventKind::TaskReceived,
            ctx.task.description.clone(),
        );
        match self.drive(&mut ctx, cancel).await {
            Ok(()) => {}
            Err(ScrumError::Cancelled) => {
                ctx.record_error("cancelled");
                ctx.transition(ScrumState::Cancelled);
            }
            Err(e) => {
                ctx.record_error(e.to_string());
                ctx.transition(ScrumState::Failed);
            }
        }
        ctx
    }

    async fn drive(
        &self,
        ctx: &mut ScrumContext,
        cancel: &CancellationToken,
    ) -> Result<(), ScrumError> {
        // PLANNING
        self.boundary(ctx, cancel).await?;
        ctx.transition(ScrumState::Planning);
        let plan = self.planner.plan(&ctx.task, cancel).await?;
        let risk = assess_risk(&plan);
        ctx.plan = Some(plan.clone());
        ctx.risk_level = Some(risk);
        info!(risk = ?risk, files = plan.file_changes.len(), "plan produced");

        // Knowledge check before approval.
        let check = match &self.checker {
            Some(checker) => {
                let task_ctx = TaskContext {
                    task_type: ctx.task.task_type,
                    description: ctx.task.description.clone(),
                    project_id: ctx.task.project_id.clone(),
                    agent_type: "scrum".into(),
                };
                let check = checker.check(&task_ctx, &plan).await?;
                if !check.can_proceed {
                    let titles: Vec<&str> = check
                        .blockers
                        .iter()
                        .map(|b| b.entry.title.as_str())
                        .collect();
                    return Err(ScrumError::Blocked(titles.join("; ")));
                }
                for warning in &check.warnings {
                    warn!(title = %warning.entry.title, "knowledge warning");
                }
                check
            }
            None => CheckResult {
                can_proceed: true,
                ..Default::default()
            },
        };

        // AWAITING_APPROVAL
        self.boundary(ctx, cancel).await?;
        ctx.transition(ScrumState::AwaitingApproval);
        let mut review_feedback: Option<String> = None;
        if !(risk == RiskLevel::Low && self.config.auto_approve_low_risk) {
            ctx.record(
                ScrumEventKind::ApprovalRequested,
                format!("risk {risk:?}"),
            );
            let decision = self.ui.request_approval(&plan, risk, &check).await?;
            if !decision.approved {
                return Err(ScrumError::ApprovalDenied);
            }
            review_feedback = decision.feedback;
        }

        // IMPLEMENTING ↔ REVIEWING loop, bounded by the retry budget.
        let result = loop {
            self.boundary(ctx, cancel).await?;
            ctx.transition(ScrumState::Implementing);
            ctx.record(
                ScrumEventKind::ImplementationStarted,
                format!("attempt {}", ctx.retry_count + 1),
            );
            let attempt = self
                .driver
                .implement(&plan, review_feedback.as_deref(), cancel)
                .await;
            let result = match attempt {
                Ok(result) => result,
                Err(EngineError::ImplementationFailed(reason)) => {
                    ctx.record_error(format!("implementation failed: {reason}"));
                    ctx.retry_count += 1;
                    if ctx.retry_count > self.config.max_retries {
                        return Err(ScrumError::RetriesExhausted(self.config.max_retries));
                    }
                    review_feedback = Some(reason);
                    continue;
                }
                Err(EngineError::Cancelled) => return Err(ScrumError::Cancelled),
                Err(e @ EngineError::CostLimitExceeded { .. }) => {
                    return Err(ScrumError::Engine(e));
                }
                Err(e) => return Err(ScrumError::Engine(e)),
            };
            if result.cost_usd > self.config.cost_limit_usd {
                return Err(ScrumError::Engine(EngineError::CostLimitExceeded {
                    spent: result.cost_usd,
                    limit: self.config.cost_limit_usd,
                }));
            }
            ctx.implementation = Some(result.clone());

            // REVIEWING
            self.boundary(ctx, cancel).await?;
            ctx.transition(ScrumState::Reviewing);
            let outcome = review_implementation(&plan, &result, &self.config.review);
            ctx.record(ScrumEventKind::ReviewCompleted, outcome.summary.clone());
            ctx.review = Some(outcome.clone());
            if outcome.passed {
                break result;
            }
            ctx.record_error(format!("review below threshold: {}", outcome.summary));
            ctx.retry_count += 1;
            if ctx.retry_count > self.config.max_retries {
                return Err(ScrumError::RetriesExhausted(self.config.max_retries));
            }
            review_feedback = Some(outcome.feedback());
        };

        // COMPLETED + learning capture.
        ctx.transition(ScrumState::Completed);
        if let Some(capture) = &self.capture {
            let outcome = TaskOutcome {
                task_description: ctx.task.description.clone(),
                summary: result.output.chars().take(200).collect(),
                file_paths: plan.file_changes.iter().map(|c| c.path.clone()).collect(),
                retries: ctx.retry_count,
                cost_usd: result.cost_usd,
            };
            match capture.capture_success(&outcome).await {
                Ok(Some(id)) => {
                    ctx.learnings.push(id.clone());
                    ctx.record(ScrumEventKind::LearningCaptured, id);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "learning capture failed"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::types::{Complexity, FileAction, FileChange};

    fn simple_plan(paths: &[&str], complexity: Complexity) -> DevelopmentPlan {
        DevelopmentPlan {
            issue_number: 1,
            summary: "do the thing".into(),
            approach: "carefully".into(),
            file_changes: paths
                .iter()
                .map(|p| FileChange {
                    path: p.to_string(),
                    action: FileAction::Modify,
                    description: String::new(),
                })
                .collect(),
            testing_strategy: "unit tests".into(),
            estimated_complexity: complexity,
            risks: vec![],
        }
    }

    struct FixedPlanner(DevelopmentPlan);

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn plan(
            &self,
            _task: &TaskInput,
            _cancel: &CancellationToken,
        ) -> Result<DevelopmentPlan, ScrumError> {
            Ok(self.0.clone())
        }
    }

    /// Driver failing `fail_times` before succeeding with a good result.
    struct FlakyDriver {
        fail_times: u32,
        calls: AtomicU32,
        feedback_seen: Mutex<Vec<Option<String>>>,
    }

    impl FlakyDriver {
        fn new(fail_times: u32) -> Self {
            Self {
                fail_times,
                calls: AtomicU32::new(0),
                feedback_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImplementationDriver for FlakyDriver {
        async fn implement(
            &self,
            plan: &DevelopmentPlan,
            feedback: Option<&str>,
            _cancel: &CancellationToken,
        ) -> Result<TaskResult, EngineError> {
            self.feedback_seen
                .lock()
                .unwrap()
                .push(feedback.map(str::to_string));
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                return Err(EngineError::ImplementationFailed("flaked".into()));
            }
            Ok(TaskResult {
                success: true,
                output: format!(
                    "Modified {} and ran the unit tests; everything passes.",
                    plan.file_changes
                        .first()
                        .map(|c| c.path.clone())
                        .unwrap_or_default()
                ),
                cost_usd: 0.5,
                duration_ms: 10,
                error: None,
                session_id: None,
            })
        }
    }

    struct FixedUi {
        approve: bool,
        asked: AtomicU32,
    }

    #[async_trait]
    impl UserInterface for FixedUi {
        async fn request_approval(
            &self,
            _plan: &DevelopmentPlan,
            _risk: RiskLevel,
            _check: &CheckResult,
        ) -> Result<ApprovalDecision, ScrumError> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            Ok(ApprovalDecision {
                approved: self.approve,
                feedback: None,
            })
        }
    }

    fn master(
        plan: DevelopmentPlan,
        driver: FlakyDriver,
        ui: FixedUi,
        config: ScrumConfig,
    ) -> (ScrumMaster, Arc<FlakyDriver>, Arc<FixedUi>) {
        let driver = Arc::new(driver);
        let ui = Arc::new(ui);
        let master = ScrumMaster::new(
            Arc::new(FixedPlanner(plan)),
            Arc::clone(&driver) as _,
            Arc::clone(&ui) as _,
            None,
            None,
            config,
        );
        (master, driver, ui)
    }

    /// **Scenario**: a low-risk task auto-approves, implements once, passes
    /// review, and completes.
    #[tokio::test]
    async fn low_risk_auto_completes() {
        let (master, _driver, ui) = master(
            simple_plan(&["src/a.rs"], Complexity::Low),
            FlakyDriver::new(0),
            FixedUi {
                approve: true,
                asked: AtomicU32::new(0),
            },
            ScrumConfig::default(),
        );
        let ctx = master.run_task(TaskInput::default(), &CancellationToken::new()).await;
        assert_eq!(ctx.state, ScrumState::Completed);
        assert_eq!(ctx.retry_count, 0);
        assert_eq!(ui.asked.load(Ordering::SeqCst), 0);
        assert!(ctx.review.as_ref().unwrap().passed);
    }

    /// **Scenario**: high risk routes through approval; denial fails the
    /// task without implementing.
    #[tokio::test]
    async fn denial_fails_task() {
        let (master, driver, ui) = master(
            simple_plan(&["src/auth/mod.rs"], Complexity::Low),
            FlakyDriver::new(0),
            FixedUi {
                approve: false,
                asked: AtomicU32::new(0),
            },
            ScrumConfig::default(),
        );
        let ctx = master.run_task(TaskInput::default(), &CancellationToken::new()).await;
        assert_eq!(ctx.state, ScrumState::Failed);
        assert_eq!(ui.asked.load(Ordering::SeqCst), 1);
        assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
        assert!(ctx.errors.iter().any(|e| e.contains("approval denied")));
    }

    /// **Scenario**: transient implementation failures retry with the
    /// failure as feedback, then complete.
    #[tokio::test]
    async fn retries_then_completes() {
        let (master, driver, _ui) = master(
            simple_plan(&["src/a.rs"], Complexity::Low),
            FlakyDriver::new(2),
            FixedUi {
                approve: true,
                asked: AtomicU32::new(0),
            },
            ScrumConfig::default(),
        );
        let ctx = master.run_task(TaskInput::default(), &CancellationToken::new()).await;
        assert_eq!(ctx.state, ScrumState::Completed);
        assert_eq!(ctx.retry_count, 2);
        let feedback = driver.feedback_seen.lock().unwrap();
        assert_eq!(feedback[0], None);
        assert_eq!(feedback[1].as_deref(), Some("flaked"));
    }

    /// **Scenario**: exceeding the retry budget fails terminally and never
    /// re-enters implementation.
    #[tokio::test]
    async fn retry_budget_exhausts() {
        let config = ScrumConfig {
            max_retries: 2,
            ..Default::default()
        };
        let (master, driver, _ui) = master(
            simple_plan(&["src/a.rs"], Complexity::Low),
            FlakyDriver::new(10),
            FixedUi {
                approve: true,
                asked: AtomicU32::new(0),
            },
            config,
        );
        let ctx = master.run_task(TaskInput::default(), &CancellationToken::new()).await;
        assert_eq!(ctx.state, ScrumState::Failed);
        assert_eq!(driver.calls.load(Ordering::SeqCst), 3);
        assert!(ctx.errors.iter().any(|e| e.contains("retry budget exhausted")));
        assert!(ctx.retry_count <= 3);
    }

    /// **Scenario**: a cost overrun terminates the task as a resource-limit
    /// failure.
    #[tokio::test]
    async fn cost_limit_fails() {
        struct ExpensiveDriver;
        #[async_trait]
        impl ImplementationDriver for ExpensiveDriver {
            async fn implement(
                &self,
                _plan: &DevelopmentPlan,
                _feedback: Option<&str>,
                _cancel: &CancellationToken,
            ) -> Result<TaskResult, EngineError> {
                Ok(TaskResult {
                    success: true,
                    output: "done".into(),
                    cost_usd: 99.0,
                    duration_ms: 1,
                    error: None,
                    session_id: None,
                })
            }
        }
        let master = ScrumMaster::new(
            Arc::new(FixedPlanner(simple_plan(&["src/a.rs"], Complexity::Low))),
            Arc::new(ExpensiveDriver),
            Arc::new(FixedUi {
                approve: true,
                asked: AtomicU32::new(0),
            }),
            None,
            None,
            ScrumConfig::default(),
        );
        let ctx = master.run_task(TaskInput::default(), &CancellationToken::new()).await;
        assert_eq!(ctx.state, ScrumState::Failed);
        assert!(ctx.errors.iter().any(|e| e.contains("cost limit exceeded")));
    }

    /// **Scenario**: cancellation lands the context in `Cancelled`.
    #[tokio::test]
    async fn cancellation_is_terminal() {
        let (master, _driver, _ui) = master(
            simple_plan(&["src/a.rs"], Complexity::Low),
            FlakyDriver::new(0),
            FixedUi {
                approve: true,
                asked: AtomicU32::new(0),
            },
            ScrumConfig::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = master.run_task(TaskInput::default(), &cancel).await;
        assert_eq!(ctx.state, ScrumState::Cancelled);
    }

    /// **Scenario**: every transition lands in the events log.
    #[tokio::test]
    async fn events_cover_transitions() {
        let (master, _driver, _ui) = master(
            simple_plan(&["src/a.rs"], Complexity::Low),
            FlakyDriver::new(0),
            FixedUi {
                approve: true,
                asked: AtomicU32::new(0),
            },
            ScrumConfig::default(),
        );
        let ctx = master.run_task(TaskInput::default(), &CancellationToken::new()).await;
        let transitions: Vec<&str> = ctx
            .events_log
            .iter()
            .filter(|e| e.kind == ScrumEventKind::StateTransition)
            .map(|e| e.message.as_str())
            .collect();
        assert!(transitions.iter().any(|m| m.contains("Planning")));
        assert!(transitions.iter().any(|m| m.contains("Implementing")));
        assert!(transitions.iter().any(|m| m.contains("Reviewing")));
        assert!(transitions.iter().any(|m| m.contains("Completed")));
    }
}

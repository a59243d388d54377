//! End-to-end engine scenarios against mock platform and provider ports.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use tamma::engine::{ApprovalMode, Engine, EngineConfig, EngineError, EngineEvent, EngineState, IterationOutcome};
use tamma::platform::{
    CreatePullRequest, GitPlatform, IssueFilter, IssueState, IssueUpdate, MergeMethod,
    PlatformError, PullRequestUpdate,
};
use tamma::provider::{AgentProvider, ProgressCallback, ProviderError, TaskConfig, TaskResult};
use tamma::types::{
    Branch, CiState, CiStatus, Commit, Issue, PrState, PullRequest, Repository,
};

fn issue(number: u64, title: &str, labels: &[&str], age_days: i64) -> Issue {
    Issue {
        number,
        title: title.to_string(),
        body: format!("Body of issue {number}"),
        labels: labels.iter().map(|s| s.to_string()).collect(),
        assignees: vec![],
        url: format!("https://example.test/issues/{number}"),
        created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
            - ChronoDuration::days(age_days),
        updated_at: Utc::now(),
        comments: vec![],
        related: vec![],
    }
}

/// Platform double: in-memory issues, branches, PRs, and a mutation log.
struct MockPlatform {
    issues: Mutex<Vec<Issue>>,
    branches: Mutex<HashSet<String>>,
    prs: Mutex<HashMap<u64, PullRequest>>,
    ci_state: Mutex<CiState>,
    next_pr: AtomicU64,
    log: Mutex<Vec<String>>,
}

impl MockPlatform {
    fn new(issues: Vec<Issue>, ci_state: CiState) -> Arc<Self> {
        Arc::new(Self {
            issues: Mutex::new(issues),
            branches: Mutex::new(HashSet::new()),
            prs: Mutex::new(HashMap::new()),
            ci_state: Mutex::new(ci_state),
            next_pr: AtomicU64::new(99),
            log: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    fn mutations(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn has_mutation(&self, prefix: &str) -> bool {
        self.mutations().iter().any(|m| m.starts_with(prefix))
    }

    fn seed_branch(&self, name: &str) {
        self.branches.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl GitPlatform for MockPlatform {
    async fn get_repository(&self) -> Result<Repository, PlatformError> {
        Ok(Repository {
            owner: "acme".into(),
            name: "widget".into(),
            default_branch: "main".into(),
            url: "https://example.test".into(),
        })
    }

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>, PlatformError> {
        let exists = self.branches.lock().unwrap().contains(name);
        Ok(exists.then(|| Branch {
            name: name.to_string(),
            sha: "base-sha".into(),
        }))
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<Branch, PlatformError> {
        self.branches.lock().unwrap().insert(name.to_string());
        self.record(format!("branch:{name}:from:{from}"));
        Ok(Branch {
            name: name.to_string(),
            sha: "new-sha".into(),
        })
    }

    async fn delete_branch(&self, name: &str) -> Result<(), PlatformError> {
        self.branches.lock().unwrap().remove(name);
        self.record(format!("delete_branch:{name}"));
        Ok(())
    }

    async fn get_issue(&self, number: u64) -> Result<Issue, PlatformError> {
        self.issues
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.number == number)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("issue {number}")))
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, PlatformError> {
        Ok(self
            .issues
            .lock()
            .unwrap()
            .iter()
            .filter(|i| filter.labels.iter().all(|l| i.labels.contains(l)))
            .cloned()
            .collect())
    }

    async fn update_issue(
        &self,
        number: u64,
        update: &IssueUpdate,
    ) -> Result<(), PlatformError> {
        if update.state == Some(IssueState::Closed) {
            self.record(format!("close_issue:{number}"));
        }
        Ok(())
    }

    async fn add_issue_comment(&self, number: u64, body: &str) -> Result<(), PlatformError> {
        self.record(format!("comment:{number}:{body}"));
        Ok(())
    }

    async fn assign_issue(&self, number: u64, assignee: &str) -> Result<(), PlatformError> {
        self.record(format!("assign:{number}:{assignee}"));
        Ok(())
    }

    async fn create_pr(
        &self,
        request: &CreatePullRequest,
    ) -> Result<PullRequest, PlatformError> {
        let number = self.next_pr.fetch_add(1, Ordering::SeqCst);
        let pr = PullRequest {
            number,
            head: request.head.clone(),
            head_sha: format!("pr-sha-{number}"),
            base: request.base.clone(),
            state: PrState::Open,
            mergeable: Some(true),
            labels: request.labels.clone(),
            url: format!("https://example.test/pull/{number}"),
        };
        self.prs.lock().unwrap().insert(number, pr.clone());
        self.record(format!("pr:{number}:{}:{}", request.title, request.body));
        Ok(pr)
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequest, PlatformError> {
        self.prs
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("pr {number}")))
    }

    async fn update_pr(
        &self,
        number: u64,
        _update: &PullRequestUpdate,
    ) -> Result<PullRequest, PlatformError> {
        self.get_pr(number).await
    }

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), PlatformError> {
        if let Some(pr) = self.prs.lock().unwrap().get_mut(&number) {
            pr.state = PrState::Merged;
        }
        self.record(format!("merge:{number}:{}", method.as_str()));
        Ok(())
    }

    async fn add_pr_comment(&self, number: u64, body: &str) -> Result<(), PlatformError> {
        self.record(format!("pr_comment:{number}:{body}"));
        Ok(())
    }

    async fn get_ci_status(&self, _sha: &str) -> Result<CiStatus, PlatformError> {
        let state = *self.ci_state.lock().unwrap();
        Ok(CiStatus {
            state,
            total: 1,
            success: usize::from(state == CiState::Success),
            failure: usize::from(state == CiState::Failure),
            pending: usize::from(state == CiState::Pending),
        })
    }

    async fn list_commits(
        &self,
        _branch: &str,
        _limit: usize,
    ) -> Result<Vec<Commit>, PlatformError> {
        Ok(vec![])
    }
}

const PLAN_JSON: &str = r#"{
    "issue_number": 42,
    "summary": "fix authentication bug",
    "approach": "tighten the token check",
    "file_changes": [{"path": "src/auth.ts", "action": "modify", "description": "fix"}],
    "testing_strategy": "unit tests",
    "estimated_complexity": "low",
    "risks": []
}"#;

/// Provider double: plan calls (json_schema set) and implementation calls
/// answer independently.
struct MockProvider {
    plan_success: bool,
    impl_success: bool,
}

#[async_trait]
impl AgentProvider for MockProvider {
    async fn execute_task(
        &self,
        config: TaskConfig,
        _progress: Option<ProgressCallback>,
        _cancel: &CancellationToken,
    ) -> Result<TaskResult, ProviderError> {
        let planning = config.json_schema.is_some();
        let success = if planning {
            self.plan_success
        } else {
            self.impl_success
        };
        Ok(TaskResult {
            success,
            output: if planning {
                PLAN_JSON.to_string()
            } else {
                "Modified src/auth.ts; unit tests pass.".to_string()
            },
            cost_usd: 0.25,
            duration_ms: 5,
            error: (!success).then(|| "agent failed".to_string()),
            session_id: Some("sess-1".into()),
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn dispose(&self) {}
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(5),
        ci_timeout: Duration::from_millis(200),
        issue_labels: vec!["tamma".into()],
        exclude_labels: vec!["wontfix".into()],
        bot_username: Some("tamma-bot".into()),
        approval_mode: ApprovalMode::Auto,
        ..Default::default()
    }
}

fn engine(platform: Arc<MockPlatform>, provider: MockProvider, config: EngineConfig) -> Engine {
    Engine::new(platform, Arc::new(provider), None, config)
}

/// **Scenario E1**: happy path — branch, PR with `Closes #42`, squash merge,
/// branch delete, issue close, engine back to idle.
#[tokio::test]
async fn e1_happy_path() {
    let platform = MockPlatform::new(
        vec![issue(42, "Fix authentication bug", &["tamma"], 3)],
        CiState::Success,
    );
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: true,
            impl_success: true,
        },
        engine_config(),
    );

    let outcome = engine.run_once(&CancellationToken::new()).await.unwrap();
    match outcome {
        IterationOutcome::Completed { issue, pr } => {
            assert_eq!(issue, 42);
            assert_eq!(pr, 99);
        }
        other => panic!("expected completion, got {other:?}"),
    }

    assert!(platform.has_mutation("branch:feature/42-fix-authentication-bug:from:main"));
    let pr_entry = platform
        .mutations()
        .into_iter()
        .find(|m| m.starts_with("pr:99:"))
        .unwrap();
    assert!(pr_entry.contains("Closes #42"));
    assert!(pr_entry.contains("fix: fix authentication bug (#42)"));
    assert!(platform.has_mutation("merge:99:squash"));
    assert!(platform.has_mutation("delete_branch:feature/42-fix-authentication-bug"));
    assert!(platform.has_mutation("close_issue:42"));
    assert_eq!(engine.context().state(), EngineState::Idle);
    assert!(engine.context().current_issue.is_none());
}

/// **Scenario E2**: no issues — idle round trip with zero mutations.
#[tokio::test]
async fn e2_no_work() {
    let platform = MockPlatform::new(vec![], CiState::Success);
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: true,
            impl_success: true,
        },
        engine_config(),
    );
    let outcome = engine.run_once(&CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, IterationOutcome::NoWork));
    assert!(platform.mutations().is_empty());
    assert_eq!(engine.context().state(), EngineState::Idle);
}

/// **Scenario E3**: the only issue carries an excluded label — no selection,
/// no mutations.
#[tokio::test]
async fn e3_excluded_label() {
    let platform = MockPlatform::new(
        vec![issue(7, "Old request", &["tamma", "wontfix"], 10)],
        CiState::Success,
    );
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: true,
            impl_success: true,
        },
        engine_config(),
    );
    let outcome = engine.run_once(&CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, IterationOutcome::NoWork));
    assert!(platform.mutations().is_empty());
}

/// **Scenario E4**: CI failure — no merge, no branch delete, issue open.
#[tokio::test]
async fn e4_ci_failure() {
    let platform = MockPlatform::new(
        vec![issue(42, "Fix authentication bug", &["tamma"], 3)],
        CiState::Failure,
    );
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: true,
            impl_success: true,
        },
        engine_config(),
    );
    let err = engine.run_once(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::CiFailed { pr: 99 }));
    assert!(!platform.has_mutation("merge:"));
    assert!(!platform.has_mutation("delete_branch:"));
    assert!(!platform.has_mutation("close_issue:"));
    // The PR stays open for a human.
    assert!(platform.has_mutation("pr:99:"));
    assert_eq!(engine.context().state(), EngineState::Idle);
}

/// **Scenario E5**: plan generation fails — error recorded, reset to idle,
/// no branch created.
#[tokio::test]
async fn e5_plan_failure() {
    let platform = MockPlatform::new(
        vec![issue(42, "Fix authentication bug", &["tamma"], 3)],
        CiState::Success,
    );
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: false,
            impl_success: true,
        },
        engine_config(),
    );
    let err = engine.run_once(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::PlanGeneration(_)));
    assert!(!platform.has_mutation("branch:"));
    assert_eq!(engine.context().state(), EngineState::Idle);
}

/// **Scenario**: oldest qualifying issue wins selection.
#[tokio::test]
async fn selects_oldest_issue() {
    let platform = MockPlatform::new(
        vec![
            issue(50, "Newer issue", &["tamma"], 1),
            issue(42, "Fix authentication bug", &["tamma"], 30),
        ],
        CiState::Success,
    );
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: true,
            impl_success: true,
        },
        engine_config(),
    );
    let outcome = engine.run_once(&CancellationToken::new()).await.unwrap();
    assert!(matches!(
        outcome,
        IterationOutcome::Completed { issue: 42, .. }
    ));
    assert!(platform.has_mutation("assign:42:tamma-bot"));
}

/// **Scenario**: branch collisions append the smallest free suffix.
#[tokio::test]
async fn branch_collision_suffix() {
    let platform = MockPlatform::new(
        vec![issue(42, "Fix authentication bug", &["tamma"], 3)],
        CiState::Success,
    );
    platform.seed_branch("feature/42-fix-authentication-bug");
    platform.seed_branch("feature/42-fix-authentication-bug-1");
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: true,
            impl_success: true,
        },
        engine_config(),
    );
    engine.run_once(&CancellationToken::new()).await.unwrap();
    assert!(platform.has_mutation("branch:feature/42-fix-authentication-bug-2:from:main"));
}

/// **Scenario**: a successful run's transitions are the nominal order, with
/// no state repeated.
#[tokio::test]
async fn state_machine_linearity() {
    let platform = MockPlatform::new(
        vec![issue(42, "Fix authentication bug", &["tamma"], 3)],
        CiState::Success,
    );
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: true,
            impl_success: true,
        },
        engine_config(),
    );
    let seen: Arc<Mutex<Vec<EngineState>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        engine.events().subscribe(move |event| {
            if let EngineEvent::StateChanged { to, .. } = event {
                seen.lock().unwrap().push(*to);
            }
        });
    }
    engine.run_once(&CancellationToken::new()).await.unwrap();

    let nominal = [
        EngineState::SelectingIssue,
        EngineState::Analyzing,
        EngineState::GeneratingPlan,
        EngineState::AwaitingApproval,
        EngineState::CreatingBranch,
        EngineState::Implementing,
        EngineState::CreatingPr,
        EngineState::MonitoringPr,
        EngineState::Completed,
        EngineState::Idle,
    ];
    let seen = seen.lock().unwrap();
    assert_eq!(seen.as_slice(), nominal.as_slice());
}

/// **Scenario**: manual approval that resolves negatively denies the run
/// before any branch exists.
#[tokio::test]
async fn manual_approval_denied() {
    let platform = MockPlatform::new(
        vec![issue(42, "Fix authentication bug", &["tamma"], 3)],
        CiState::Success,
    );
    let mut config = engine_config();
    config.approval_mode = ApprovalMode::Manual;
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: true,
            impl_success: true,
        },
        config,
    );

    let gate = engine.approval_gate();
    engine.events().subscribe(move |event| {
        if matches!(event, EngineEvent::AwaitingApproval { .. }) {
            gate.resolve(false);
        }
    });
    let err = engine.run_once(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::ApprovalDenied(42)));
    assert!(!platform.has_mutation("branch:"));
}

/// **Scenario**: CI stuck pending past the deadline times out and leaves the
/// PR intact.
#[tokio::test]
async fn ci_timeout_leaves_pr() {
    let platform = MockPlatform::new(
        vec![issue(42, "Fix authentication bug", &["tamma"], 3)],
        CiState::Pending,
    );
    let mut config = engine_config();
    config.ci_timeout = Duration::from_millis(30);
    config.poll_interval = Duration::from_millis(10);
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: true,
            impl_success: true,
        },
        config,
    );
    let err = engine.run_once(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::CiTimeout { pr: 99, .. }));
    assert!(!platform.has_mutation("merge:"));
    assert!(platform.has_mutation("pr:99:"));
}

/// **Scenario**: dry-run stops after planning with zero platform mutations.
#[tokio::test]
async fn dry_run_stops_after_plan() {
    let platform = MockPlatform::new(
        vec![issue(42, "Fix authentication bug", &["tamma"], 3)],
        CiState::Success,
    );
    let mut config = engine_config();
    config.dry_run = true;
    let mut engine = engine(
        Arc::clone(&platform),
        MockProvider {
            plan_success: true,
            impl_success: true,
        },
        config,
    );
    let outcome = engine.run_once(&CancellationToken::new()).await.unwrap();
    match outcome {
        IterationOutcome::PlanOnly(plan) => {
            assert_eq!(plan.issue_number, 42);
        }
        other => panic!("expected plan-only outcome, got {other:?}"),
    }
    assert!(platform.mutations().is_empty());
}

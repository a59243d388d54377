//! Engine states, context, events, and the external approval gate.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::oneshot;

use crate::provider::ProgressEvent;
use crate::types::{CiState, Complexity, DevelopmentPlan, Issue, PullRequest};

/// The issue-to-merge lifecycle. Transitions are linear on success; any
/// error records context and resets to `Idle`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    SelectingIssue,
    Analyzing,
    GeneratingPlan,
    AwaitingApproval,
    CreatingBranch,
    Implementing,
    CreatingPr,
    MonitoringPr,
    Completed,
    Error,
}

/// Mutable per-iteration state. Single-writer: only the engine loop touches
/// it, and a fresh iteration never observes the previous one.
#[derive(Clone, Debug, Default)]
pub struct EngineContext {
    pub state: EngineState,
    pub current_issue: Option<Issue>,
    pub current_plan: Option<DevelopmentPlan>,
    pub current_pr: Option<PullRequest>,
    pub current_branch: Option<String>,
    pub agent_session_id: Option<String>,
}

impl EngineContext {
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Clears everything issue-bound. Holds the invariant that
    /// `current_issue` is set iff the state is neither `Idle` nor `Error`.
    pub fn reset(&mut self) {
        *self = EngineContext::default();
    }
}

/// Outcome of one engine iteration.
#[derive(Clone, Debug)]
pub enum IterationOutcome {
    /// No qualifying issue; nothing was mutated.
    NoWork,
    /// Dry-run stopped after planning.
    PlanOnly(DevelopmentPlan),
    /// Issue merged and closed.
    Completed { issue: u64, pr: u64 },
}

/// Typed engine events, published on every transition and significant step.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    StateChanged {
        from: EngineState,
        to: EngineState,
    },
    IssueSelected {
        number: u64,
        title: String,
    },
    PlanGenerated {
        issue: u64,
        summary: String,
        complexity: Complexity,
    },
    AwaitingApproval {
        issue: u64,
    },
    BranchCreated {
        name: String,
    },
    Progress(ProgressEvent),
    PrOpened {
        number: u64,
        url: String,
    },
    CiPoll {
        pr: u64,
        state: CiState,
    },
    Merged {
        pr: u64,
    },
    IssueClosed {
        number: u64,
    },
    Error {
        state: EngineState,
        message: String,
    },
}

type Listener = Box<dyn Fn(&EngineEvent) + Send + Sync>;

/// Fan-out of engine events to registered listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn subscribe(&self, listener: impl Fn(&EngineEvent) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(listener));
    }

    pub fn emit(&self, event: &EngineEvent) {
        for listener in self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            listener(event);
        }
    }
}

/// Handle an external caller uses to resolve a manual approval. The engine
/// arms it when entering `AwaitingApproval`; resolving is idempotent (later
/// calls find nothing to resolve).
#[derive(Clone, Default)]
pub struct ApprovalGate {
    inner: Arc<Mutex<Option<oneshot::Sender<bool>>>>,
}

impl ApprovalGate {
    pub(crate) fn arm(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    /// Resolves a pending approval. Returns false when nothing was armed.
    pub fn resolve(&self, approved: bool) -> bool {
        match self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        }
    }
}

//! Supervisor session context and its append-only event log.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::provider::TaskResult;
use crate::types::{DevelopmentPlan, TaskType};

use super::review::ReviewOutcome;
use super::risk::RiskLevel;

/// Supervisor states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrumState {
    #[default]
    Idle,
    Planning,
    AwaitingApproval,
    Implementing,
    Reviewing,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

/// Task handed to the supervisor.
#[derive(Clone, Debug, Default)]
pub struct TaskInput {
    pub description: String,
    pub task_type: TaskType,
    pub project_id: Option<String>,
    /// Issue number when the task tracks one.
    pub issue_number: Option<u64>,
}

/// Typed supervisor events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScrumEventKind {
    StateTransition,
    TaskReceived,
    ApprovalRequested,
    ImplementationStarted,
    ReviewCompleted,
    Error,
    LearningCaptured,
}

/// One event in the session log. `seq` is strictly monotonic within a
/// context; timestamps are non-decreasing.
#[derive(Clone, Debug, Serialize)]
pub struct ScrumEvent {
    pub seq: u64,
    pub kind: ScrumEventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-task supervisor state. Single-writer: only the owning supervisor
/// session mutates it.
#[derive(Clone, Debug)]
pub struct ScrumContext {
    pub state: ScrumState,
    pub task: TaskInput,
    pub plan: Option<DevelopmentPlan>,
    pub risk_level: Option<RiskLevel>,
    pub implementation: Option<TaskResult>,
    pub review: Option<ReviewOutcome>,
    pub retry_count: u32,
    pub errors: Vec<String>,
    pub learnings: Vec<String>,
    pub events_log: Vec<ScrumEvent>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScrumContext {
    pub fn new(task: TaskInput) -> Self {
        let now = Utc::now();
        Self {
            state: ScrumState::Idle,
            task,
            plan: None,
            risk_level: None,
            implementation: None,
            review: None,
            retry_count: 0,
            errors: Vec::new(),
            learnings: Vec::new(),
            events_log: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Appends an event with the next monotonic sequence number.
    pub fn record(&mut self, kind: ScrumEventKind, message: impl Into<String>) {
        let seq = self.events_log.len() as u64 + 1;
        self.updated_at = Utc::now();
        self.events_log.push(ScrumEvent {
            seq,
            kind,
            message: message.into(),
            timestamp: self.updated_at,
        });
    }

    /// Transitions state and logs it.
    pub fn transition(&mut self, to: ScrumState) {
        let from = self.state;
        self.state = to;
        self.record(
            ScrumEventKind::StateTransition,
            format!("{from:?} -> {to:?}"),
        );
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.errors.push(message.clone());
        self.record(ScrumEventKind::Error, message);
    }
}

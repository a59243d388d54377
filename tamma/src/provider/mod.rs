//! Agent provider: drives an external coding process and surfaces its
//! progress and final result.

mod stream_json;
mod subprocess;

pub use stream_json::{parse_line, ParsedLine, StreamEventRecord, TerminalRecord};
pub use subprocess::SubprocessProvider;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCategory;

/// Errors from provider operations. A task that ran but did not succeed is
/// not an error; that outcome lives in [`TaskResult`].
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("agent unavailable: {0}")]
    Unavailable(String),
    #[error("spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Unavailable(_)
            | ProviderError::Spawn { .. }
            | ProviderError::Io(_) => ErrorCategory::Transient,
            ProviderError::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// How the coding agent is invoked; the `agent` config section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSettings {
    pub model: String,
    pub max_budget_usd: f64,
    pub allowed_tools: Vec<String>,
    pub permission_mode: PermissionMode,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".into(),
            max_budget_usd: 5.0,
            allowed_tools: vec![
                "Read".into(),
                "Edit".into(),
                "Write".into(),
                "Bash".into(),
            ],
            permission_mode: PermissionMode::Ask,
        }
    }
}

impl AgentSettings {
    /// Builds the base task config for one prompt.
    pub fn task_config(&self, prompt: impl Into<String>, working_dir: PathBuf) -> TaskConfig {
        TaskConfig {
            prompt: prompt.into(),
            model: self.model.clone(),
            max_budget_usd: self.max_budget_usd,
            allowed_tools: self.allowed_tools.clone(),
            skip_permissions: self.permission_mode == PermissionMode::BypassPermissions,
            json_schema: None,
            resume_session: None,
            working_dir,
        }
    }
}

/// Permission handling for the coding subprocess.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionMode {
    #[default]
    #[serde(rename = "ask")]
    Ask,
    #[serde(rename = "bypassPermissions")]
    BypassPermissions,
}

/// Configuration for one task execution.
#[derive(Clone, Debug)]
pub struct TaskConfig {
    pub prompt: String,
    pub model: String,
    pub max_budget_usd: f64,
    pub allowed_tools: Vec<String>,
    /// Maps to the coding CLI's permission bypass flag.
    pub skip_permissions: bool,
    /// JSON schema the final result must satisfy, when structured output is
    /// needed (plan generation).
    pub json_schema: Option<Value>,
    /// Resume a previous session instead of starting fresh.
    pub resume_session: Option<String>,
    pub working_dir: PathBuf,
}

impl TaskConfig {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            max_budget_usd: 5.0,
            allowed_tools: Vec::new(),
            skip_permissions: false,
            json_schema: None,
            resume_session: None,
            working_dir,
        }
    }
}

/// Progress emitted while the task runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Text { text: String },
    ToolUse { name: String },
}

/// Callback invoked for each progress event.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Final outcome of one task execution.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// The provider port.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    async fn execute_task(
        &self,
        config: TaskConfig,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, ProviderError>;

    async fn is_available(&self) -> bool;

    async fn dispose(&self);
}

//! Crate-level error type and categories.
//!
//! Each subsystem keeps its own `thiserror` enum; [`TammaError`] wraps them
//! at the top so the CLI can map any failure onto a category and an exit
//! code. Retry policy keys off [`ErrorCategory`]: only `Transient` is ever
//! retried locally, everything else bubbles to the nearest state machine.

use thiserror::Error;

use crate::aggregator::AggregatorError;
use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::knowledge::KnowledgeError;
use crate::mcp::McpError;
use crate::platform::PlatformError;
use crate::provider::ProviderError;
use crate::rpc::RpcError;
use crate::scrum::ScrumError;
use crate::transport::TransportError;

/// Categorical error kinds driving propagation policy and exit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or invalid configuration. Exit code 2.
    Configuration,
    /// Network failure, HTTP 429/5xx, timeout. Retried with backoff.
    Transient,
    /// Malformed JSON, JSON-RPC error response, unexpected state. Never retried.
    Protocol,
    /// Plan generation failed, CI failed, review failed, approval denied.
    Business,
    /// Cost, token, or retry budget exhausted. Terminal for the task.
    ResourceLimit,
    /// Denied by the permission gate. Terminal for the operation.
    Permission,
    /// Caller-initiated cancellation. Terminal, no retry.
    Cancelled,
}

/// Top-level error: one variant per subsystem.
#[derive(Debug, Error)]
pub enum TammaError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Mcp(#[from] McpError),
    #[error(transparent)]
    Aggregator(#[from] AggregatorError),
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Scrum(#[from] ScrumError),
}

impl TammaError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TammaError::Config(_) => ErrorCategory::Configuration,
            TammaError::Transport(e) => e.category(),
            TammaError::Rpc(e) => e.category(),
            TammaError::Mcp(e) => e.category(),
            TammaError::Aggregator(e) => e.category(),
            TammaError::Knowledge(_) => ErrorCategory::Business,
            TammaError::Provider(e) => e.category(),
            TammaError::Platform(e) => e.category(),
            TammaError::Engine(e) => e.category(),
            TammaError::Scrum(e) => e.category(),
        }
    }

    /// Process exit code for the CLI: 0 clean, 1 generic, 2 configuration,
    /// 3 agent unavailable, 4 platform unavailable.
    pub fn exit_code(&self) -> i32 {
        match self {
            TammaError::Config(_) => 2,
            TammaError::Provider(ProviderError::Unavailable(_)) => 3,
            TammaError::Platform(PlatformError::Unavailable(_)) => 4,
            _ => 1,
        }
    }
}

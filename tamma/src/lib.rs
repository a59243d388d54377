//! # Tamma
//!
//! An autonomous issue-to-merge agent: it selects issues from a code
//! hosting platform, plans a change, drives a coding subprocess to make it,
//! opens a pull request, waits for CI, and merges — with a scrum-master
//! supervisor layering risk assessment, approval, review, bounded retry,
//! and learning capture on top.
//!
//! ## Main modules
//!
//! - [`engine`]: the issue-to-merge state machine ([`Engine`],
//!   [`EngineConfig`], [`EngineEvent`]).
//! - [`scrum`]: the supervisor ([`ScrumMaster`], [`ScrumContext`],
//!   [`RiskLevel`]).
//! - [`aggregator`]: multi-source context assembly ([`ContextAggregator`]).
//! - [`rag`]: retrieval pipeline — query processing, RRF fusion, MMR
//!   diversification, budget packing ([`RagPipeline`]).
//! - [`source`]: retrieval sources behind one contract ([`ContextSource`];
//!   vector, keyword/BM25, RAG, MCP).
//! - [`mcp`]: MCP client — connections, discovery, reconnect, caches
//!   ([`McpConnection`], [`ServerRegistry`]).
//! - [`rpc`]: JSON-RPC 2.0 multiplexing ([`RequestTable`]).
//! - [`transport`]: stdio / SSE / WebSocket carriers ([`Transport`]).
//! - [`provider`]: the coding subprocess driver ([`AgentProvider`],
//!   [`SubprocessProvider`]).
//! - [`platform`]: hosting-platform port and GitHub adapter
//!   ([`GitPlatform`], [`GitHubPlatform`]).
//! - [`knowledge`]: pre-task checks, duplicate detection, learning capture.
//! - [`config`]: the closed configuration schema ([`TammaConfig`]).
//!
//! All long-running operations take a
//! [`CancellationToken`](tokio_util::sync::CancellationToken); cancellation
//! propagates down to subprocess termination and connection close.

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod knowledge;
pub mod mcp;
pub mod platform;
pub mod provider;
pub mod rag;
pub mod rpc;
pub mod source;
pub mod scrum;
pub mod transport;
pub mod types;

pub use aggregator::{AggregatorConfig, AggregatorError, ContextAggregator};
pub use config::{ConfigError, TammaConfig};
pub use engine::{
    ApprovalGate, ApprovalMode, Engine, EngineConfig, EngineError, EngineEvent, EngineState,
    IterationOutcome,
};
pub use error::{ErrorCategory, TammaError};
pub use knowledge::{
    DuplicateDetector, KnowledgeEntry, KnowledgeStore, LearningCapture, PreTaskChecker,
};
pub use mcp::{ConnectionStatus, McpConnection, McpError, McpServerConfig, ServerRegistry};
pub use platform::{GitHubPlatform, GitPlatform, MergeMethod, PlatformError};
pub use provider::{
    AgentProvider, AgentSettings, ProgressEvent, ProviderError, SubprocessProvider, TaskResult,
};
pub use rag::{RagConfig, RagPipeline, RankingConfig};
pub use rpc::{RequestTable, RpcError};
pub use scrum::{RiskLevel, ScrumConfig, ScrumContext, ScrumError, ScrumMaster, ScrumState};
pub use source::{ContextSource, Embedder, KeywordIndex, SourceError, VectorStore};
pub use transport::{Transport, TransportError, TransportKind};
pub use types::{
    ContextChunk, ContextRequest, ContextResponse, DevelopmentPlan, Issue, PullRequest,
    SourceKind, TaskType,
};

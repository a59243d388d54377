//! Structured configuration: one TOML file with closed sections. Unknown
//! keys are rejected at load time.
//!
//! Environment variables fill the gaps the file leaves: the platform token
//! falls back to `TAMMA_PLATFORM_TOKEN` then `GITHUB_TOKEN`, and the coding
//! CLI path comes from `TAMMA_AGENT_CLI` (default `claude`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregator::AggregatorConfig;
use crate::engine::{ApprovalMode, EngineConfig};
use crate::mcp::McpServerConfig;
use crate::platform::MergeMethod;
use crate::provider::AgentSettings;
use crate::rag::RagConfig;

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required option: {0}")]
    Missing(String),
    #[error("invalid option {option}: {reason}")]
    Invalid { option: String, reason: String },
}

/// The `engine` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub poll_interval_ms: u64,
    pub ci_timeout_secs: u64,
    pub working_directory: PathBuf,
    pub max_retries: u32,
    pub approval_mode: ApprovalMode,
    pub merge_method: MergeMethod,
    pub pr_labels: Vec<String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            ci_timeout_secs: 1_800,
            working_directory: PathBuf::from("."),
            max_retries: 3,
            approval_mode: ApprovalMode::Auto,
            merge_method: MergeMethod::Squash,
            pr_labels: Vec::new(),
        }
    }
}

/// The `platform` section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformSection {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub issue_labels: Vec<String>,
    pub exclude_labels: Vec<String>,
    pub bot_username: Option<String>,
}

/// The `mcp` section: a list of server declarations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct McpSection {
    pub servers: Vec<McpServerConfig>,
}

/// The full configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TammaConfig {
    pub agent: AgentSettings,
    pub engine: EngineSection,
    pub platform: PlatformSection,
    pub aggregator: AggregatorConfig,
    pub rag: RagConfig,
    pub mcp: McpSection,
}

impl TammaConfig {
    /// Loads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: TammaConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment fallbacks for secrets and overrides.
    pub fn apply_env(&mut self) {
        if self.platform.token.is_empty() {
            if let Ok(token) =
                std::env::var("TAMMA_PLATFORM_TOKEN").or_else(|_| std::env::var("GITHUB_TOKEN"))
            {
                self.platform.token = token;
            }
        }
        if let Ok(dir) = std::env::var("TAMMA_WORKDIR") {
            if !dir.is_empty() {
                self.engine.working_directory = PathBuf::from(dir);
            }
        }
    }

    /// Coding CLI binary path: `TAMMA_AGENT_CLI`, else `claude`.
    pub fn agent_binary() -> String {
        std::env::var("TAMMA_AGENT_CLI").unwrap_or_else(|_| "claude".to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform.token.is_empty() {
            return Err(ConfigError::Missing("platform.token".into()));
        }
        if self.platform.owner.is_empty() {
            return Err(ConfigError::Missing("platform.owner".into()));
        }
        if self.platform.repo.is_empty() {
            return Err(ConfigError::Missing("platform.repo".into()));
        }
        if self.aggregator.budget.reserved_tokens >= self.aggregator.budget.default_max_tokens {
            return Err(ConfigError::Invalid {
                option: "aggregator.budget.reserved_tokens".into(),
                reason: "must be below default_max_tokens".into(),
            });
        }
        let mut names = std::collections::HashSet::new();
        for server in &self.mcp.servers {
            if !names.insert(server.name.as_str()) {
                return Err(ConfigError::Invalid {
                    option: "mcp.servers".into(),
                    reason: format!("duplicate server name {}", server.name),
                });
            }
            crate::mcp::build_transport(server).map_err(|e| ConfigError::Invalid {
                option: format!("mcp.servers.{}", server.name),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Assembles the engine's runtime config from the sections.
    pub fn engine_config(&self, dry_run: bool) -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(self.engine.poll_interval_ms),
            ci_timeout: Duration::from_secs(self.engine.ci_timeout_secs),
            working_directory: self.engine.working_directory.clone(),
            max_retries: self.engine.max_retries,
            approval_mode: self.engine.approval_mode,
            issue_labels: self.platform.issue_labels.clone(),
            exclude_labels: self.platform.exclude_labels.clone(),
            bot_username: self.platform.bot_username.clone(),
            merge_method: self.engine.merge_method,
            pr_labels: self.engine.pr_labels.clone(),
            dry_run,
            agent: self.agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[platform]
token = "t"
owner = "acme"
repo = "widget"
issue_labels = ["tamma"]
"#;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tamma.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    /// **Scenario**: a minimal config loads with defaults everywhere else.
    #[test]
    fn minimal_config_loads() {
        let (_dir, path) = write_config(MINIMAL);
        let config = TammaConfig::load(&path).unwrap();
        assert_eq!(config.platform.owner, "acme");
        assert_eq!(config.engine.poll_interval_ms, 30_000);
        assert_eq!(config.engine.merge_method, MergeMethod::Squash);
        assert!(config.aggregator.caching.enabled);
        assert!(config.mcp.servers.is_empty());
    }

    /// **Scenario**: unknown keys are rejected at load time.
    #[test]
    fn unknown_keys_rejected() {
        let (_dir, path) = write_config(&format!("{MINIMAL}\n[engine]\nbogus_option = 1\n"));
        assert!(matches!(
            TammaConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    /// **Scenario**: missing platform identity fails validation.
    #[test]
    fn missing_owner_fails() {
        let (_dir, path) = write_config("[platform]\ntoken = \"t\"\nrepo = \"r\"\n");
        assert!(matches!(
            TammaConfig::load(&path),
            Err(ConfigError::Missing(option)) if option == "platform.owner"
        ));
    }

    /// **Scenario**: an mcp server with a broken transport declaration is
    /// rejected.
    #[test]
    fn bad_mcp_server_rejected() {
        let content = format!(
            "{MINIMAL}\n[[mcp.servers]]\nname = \"files\"\ntransport = \"stdio\"\n"
        );
        let (_dir, path) = write_config(&content);
        assert!(matches!(
            TammaConfig::load(&path),
            Err(ConfigError::Invalid { .. })
        ));
    }

    /// **Scenario**: reserved tokens must leave budget for chunks.
    #[test]
    fn reserved_tokens_bounded() {
        let content = format!(
            "{MINIMAL}\n[aggregator.budget]\ndefault_max_tokens = 100\nreserved_tokens = 100\n"
        );
        let (_dir, path) = write_config(&content);
        assert!(matches!(
            TammaConfig::load(&path),
            Err(ConfigError::Invalid { .. })
        ));
    }

    /// **Scenario**: the engine config assembles from the sections.
    #[test]
    fn engine_config_assembly() {
        let (_dir, path) = write_config(MINIMAL);
        let config = TammaConfig::load(&path).unwrap();
        let engine = config.engine_config(true);
        assert!(engine.dry_run);
        assert_eq!(engine.poll_interval, Duration::from_secs(30));
        assert_eq!(engine.issue_labels, vec!["tamma".to_string()]);
    }
}

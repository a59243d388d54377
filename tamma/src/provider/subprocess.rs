//! Subprocess provider: spawns the coding CLI, streams its stream-json
//! stdout, and returns the structured terminal result.
//!
//! stdout is read by exactly one parser; stderr is buffered separately and
//! becomes the error text when the run ends without a success record.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stream_json::{parse_line, ParsedLine, StreamEventRecord, TerminalRecord};
use super::{AgentProvider, ProgressCallback, ProgressEvent, ProviderError, TaskConfig, TaskResult};

const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Drives the coding CLI as a child process.
pub struct SubprocessProvider {
    binary: String,
    grace: Duration,
    active: Arc<Mutex<Option<Child>>>,
}

impl SubprocessProvider {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            grace: DEFAULT_GRACE,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn build_args(config: &TaskConfig) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            config.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--model".to_string(),
            config.model.clone(),
            "--max-budget-usd".to_string(),
            format!("{}", config.max_budget_usd),
        ];
        if !config.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(config.allowed_tools.join(","));
        }
        if config.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(schema) = &config.json_schema {
            args.push("--json-schema".to_string());
            args.push(schema.to_string());
        }
        if let Some(session) = &config.resume_session {
            args.push("--resume".to_string());
            args.push(session.clone());
        }
        args
    }

    fn emit(progress: &Option<ProgressCallback>, event: ProgressEvent) {
        if let Some(cb) = progress {
            cb(event);
        }
    }

    async fn terminate_active(&self) {
        let mut guard = self.active.lock().await;
        if let Some(child) = guard.as_mut() {
            match tokio::time::timeout(self.grace, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(binary = %self.binary, "grace period elapsed, killing subprocess");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
        *guard = None;
    }
}

#[async_trait]
impl AgentProvider for SubprocessProvider {
    async fn execute_task(
        &self,
        config: TaskConfig,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, ProviderError> {
        let start = Instant::now();
        let args = Self::build_args(&config);
        debug!(binary = %self.binary, workdir = %config.working_dir.display(), "spawning coding subprocess");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .current_dir(&config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProviderError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ProviderError::Io(std::io::Error::other("child stdout unavailable"))
        })?;
        let mut stderr = child.stderr.take();
        *self.active.lock().await = Some(child);

        // stderr drains concurrently so a chatty child never blocks.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut terminal: Option<TerminalRecord> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(binary = %self.binary, "task cancelled, terminating subprocess");
                    if let Some(child) = self.active.lock().await.as_mut() {
                        let _ = child.start_kill();
                    }
                    self.terminate_active().await;
                    stderr_task.abort();
                    return Err(ProviderError::Cancelled);
                }
                line = lines.next_line() => match line? {
                    None => break,
                    Some(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match parse_line(&line) {
                            ParsedLine::Events(events) => {
                                for event in events {
                                    match event {
                                        StreamEventRecord::Text(text) => {
                                            Self::emit(&progress, ProgressEvent::Text { text })
                                        }
                                        StreamEventRecord::ToolUse { name } => {
                                            Self::emit(&progress, ProgressEvent::ToolUse { name })
                                        }
                                    }
                                }
                            }
                            ParsedLine::Terminal(record) => terminal = Some(record),
                            ParsedLine::Raw(text) => {
                                Self::emit(&progress, ProgressEvent::Text { text })
                            }
                        }
                    }
                }
            }
        }

        let status = {
            let mut guard = self.active.lock().await;
            match guard.as_mut() {
                Some(child) => {
                    let status = child.wait().await?;
                    *guard = None;
                    Some(status)
                }
                None => None,
            }
        };
        let stderr_text = stderr_task.await.unwrap_or_default();
        let wall_ms = start.elapsed().as_millis() as u64;

        let result = match terminal {
            Some(record) if record.is_success() => TaskResult {
                success: true,
                output: record.result,
                cost_usd: record.cost_usd,
                duration_ms: if record.duration_ms > 0 {
                    record.duration_ms
                } else {
                    wall_ms
                },
                error: None,
                session_id: record.session_id,
            },
            Some(record) => {
                let error = record
                    .errors
                    .first()
                    .cloned()
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| {
                        if stderr_text.trim().is_empty() {
                            format!("agent run ended with subtype {}", record.subtype)
                        } else {
                            stderr_text.trim().to_string()
                        }
                    });
                TaskResult {
                    success: false,
                    output: record.result,
                    cost_usd: record.cost_usd,
                    duration_ms: wall_ms,
                    error: Some(error),
                    session_id: record.session_id,
                }
            }
            None => TaskResult {
                success: false,
                output: String::new(),
                cost_usd: 0.0,
                duration_ms: wall_ms,
                error: Some(if stderr_text.trim().is_empty() {
                    format!(
                        "agent exited without a result record (status {:?})",
                        status.map(|s| s.code())
                    )
                } else {
                    stderr_text.trim().to_string()
                }),
                session_id: None,
            },
        };
        info!(
            success = result.success,
            cost_usd = result.cost_usd,
            duration_ms = result.duration_ms,
            "agent task finished"
        );
        Ok(result)
    }

    async fn is_available(&self) -> bool {
        if which::which(&self.binary).is_err() {
            return false;
        }
        let probe = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        matches!(
            tokio::time::timeout(Duration::from_secs(10), probe).await,
            Ok(Ok(status)) if status.success()
        )
    }

    async fn dispose(&self) {
        self.terminate_active().await;
    }
}

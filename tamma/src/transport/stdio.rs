//! Stdio transport: spawn a server process and exchange newline-delimited
//! JSON over its stdin/stdout.
//!
//! stdin is write-only from this side; stdout is read by exactly one parser
//! task. Child stderr is discarded by default; `stderr_verbose` inherits it
//! so server debug logs stay visible.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{Transport, TransportError, TransportEvent, TransportKind, EVENT_CHANNEL_CAPACITY};

/// Newline-delimited JSON over a spawned child process.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    stderr_verbose: bool,
    child: Option<Child>,
    stdin: Option<Arc<Mutex<ChildStdin>>>,
    reader: Option<tokio::task::JoinHandle<()>>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            stderr_verbose: false,
            child: None,
            stdin: None,
            reader: None,
        }
    }

    /// Extra environment for the child process (e.g. server API tokens).
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_stderr_verbose(mut self, verbose: bool) -> Self {
        self.stderr_verbose = verbose;
        self
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let stderr = if self.stderr_verbose {
            Stdio::inherit()
        } else {
            Stdio::null()
        };
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(TransportError::NotConnected)?;
        let stdout = child.stdout.take().ok_or(TransportError::NotConnected)?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let command = self.command.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(line) {
                            Ok(value) => {
                                if tx.send(TransportEvent::Message(value)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(command = %command, error = %e, "non-JSON line on stdio transport");
                                let _ = tx
                                    .send(TransportEvent::Error(format!("invalid JSON: {e}")))
                                    .await;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(command = %command, "stdio transport reached EOF");
                        let _ = tx.send(TransportEvent::Closed).await;
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                        let _ = tx.send(TransportEvent::Closed).await;
                        break;
                    }
                }
            }
        });

        self.stdin = Some(Arc::new(Mutex::new(stdin)));
        self.child = Some(child);
        self.reader = Some(reader);
        Ok(rx)
    }

    async fn send(&self, message: &Value) -> Result<(), TransportError> {
        let stdin = self.stdin.as_ref().ok_or(TransportError::NotConnected)?;
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let mut guard = stdin.lock().await;
        guard.write_all(line.as_bytes()).await?;
        guard.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stdin = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = self.child.take() {
            // The child may already be gone after EOF; ignore kill failures.
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        Ok(())
    }
}

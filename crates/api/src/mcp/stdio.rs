//! Stdio channel: a child process speaking newline-delimited JSON-RPC.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::client::{McpClientError, McpResult};
use super::multiplex::PendingRequests;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Grace period between closing stdin and killing the process
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct StdioChannel {
    backend_id: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: Arc<PendingRequests>,
    reader: JoinHandle<()>,
}

impl StdioChannel {
    /// Spawn the backend process and start its stdout/stderr readers
    pub fn spawn(
        backend_id: &str,
        command: &str,
        args: &[String],
        working_dir: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> McpResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpClientError::ProcessError(format!("Failed to spawn {}: {}", command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpClientError::ProcessError("Failed to capture stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpClientError::ProcessError("Failed to capture stdout".to_string()))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpClientError::ProcessError("Failed to capture stderr".to_string()))?;

        tracing::info!(
            backend_id = %backend_id,
            command = %command,
            pid = child.id().unwrap_or_default(),
            "Spawned stdio backend"
        );

        spawn_stderr_logger(backend_id.to_string(), stderr);

        let pending = PendingRequests::new();
        let reader = {
            let pending = Arc::clone(&pending);
            let backend_id = backend_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if !line.is_empty() {
                                pending.dispatch(line);
                            }
                        }
                        Ok(None) => {
                            tracing::debug!(backend_id = %backend_id, "stdout closed");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(backend_id = %backend_id, error = %e, "Failed to read stdout");
                            break;
                        }
                    }
                }
                pending.close();
            })
        };

        Ok(Self {
            backend_id: backend_id.to_string(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending,
            reader,
        })
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> McpResult<JsonRpcResponse> {
        let ticket = self.pending.register()?;
        let request = JsonRpcRequest::new(ticket.id(), method, params);
        self.write_line(&serde_json::to_string(&request)?).await?;
        ticket.wait().await
    }

    pub async fn notify(&self, notification: &JsonRpcNotification) -> McpResult<()> {
        self.write_line(&serde_json::to_string(notification)?).await
    }

    async fn write_line(&self, json: &str) -> McpResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(McpClientError::ConnectionClosed)?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close stdin, give the process a grace period, then kill and reap it
    pub async fn close(&self) -> McpResult<()> {
        drop(self.stdin.lock().await.take());
        self.pending.close();

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(backend_id = %self.backend_id, ?status, "Process exited gracefully");
            }
            Ok(Err(e)) => {
                tracing::error!(backend_id = %self.backend_id, error = %e, "Error waiting for process");
            }
            Err(_) => {
                tracing::warn!(backend_id = %self.backend_id, "Killing unresponsive process");
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }

        self.reader.abort();
        Ok(())
    }
}

fn spawn_stderr_logger(backend_id: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if trimmed.contains("ERROR") || trimmed.contains("FATAL") {
                tracing::error!(backend_id = %backend_id, stderr = %trimmed);
            } else if trimmed.contains("WARN") {
                tracing::warn!(backend_id = %backend_id, stderr = %trimmed);
            } else {
                tracing::debug!(backend_id = %backend_id, stderr = %trimmed);
            }
        }
        tracing::debug!(backend_id = %backend_id, "stderr reader task exiting");
    });
}

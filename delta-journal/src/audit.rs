//! Best-effort on-disk capture of LLM invocations and tool executions.
//!
//! Everything here is diagnostics, not state: a failure to capture audit
//! must never fail the operation being audited, so every write logs at
//! WARN on error and returns normally.

use std::path::{Path, PathBuf};

use delta_types::TokenUsage;
use serde::Serialize;

/// Capture directories under `<run_dir>/io/`.
pub struct AuditStore {
    run_dir: PathBuf,
}

/// Per-invocation metadata written next to the request/response capture.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationMeta {
    /// RFC3339 start of the LLM call.
    pub start_time: String,
    /// RFC3339 end of the LLM call.
    pub end_time: String,
    /// Model the request named.
    pub model: String,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Token usage, when the provider reported it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Everything captured for one tool subprocess.
#[derive(Debug, Clone)]
pub struct ToolExecutionCapture<'a> {
    /// The resolved argv.
    pub command: &'a [String],
    /// Bytes piped to stdin, if any.
    pub stdin: Option<&'a str>,
    /// Full stdout. Never truncated here.
    pub stdout: &'a str,
    /// Full stderr. Never truncated here.
    pub stderr: &'a str,
    /// Exit code (-1 when the process was killed on timeout).
    pub exit_code: i32,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl AuditStore {
    /// Create a store rooted at the run directory.
    pub fn new(run_dir: &Path) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
        }
    }

    /// Directory for one LLM invocation.
    pub fn invocation_dir(&self, invocation_id: &str) -> PathBuf {
        self.run_dir.join("io").join("invocations").join(invocation_id)
    }

    /// Directory for one tool execution.
    pub fn tool_execution_dir(&self, exec_id: &str) -> PathBuf {
        self.run_dir
            .join("io")
            .join("tool_executions")
            .join(exec_id)
    }

    /// Persist the exact outbound payload (the final post-hook bytes).
    /// Written before the call so a transport crash still leaves the
    /// request on disk.
    pub async fn write_invocation_request(&self, invocation_id: &str, payload: &serde_json::Value) {
        let dir = self.invocation_dir(invocation_id);
        if let Err(e) = write_json(&dir, "request.json", payload).await {
            tracing::warn!(invocation_id, error = %e, "failed to capture LLM request");
        }
    }

    /// Persist the raw response and the invocation metadata.
    pub async fn write_invocation_response(
        &self,
        invocation_id: &str,
        response: &serde_json::Value,
        meta: &InvocationMeta,
    ) {
        let dir = self.invocation_dir(invocation_id);
        if let Err(e) = write_json(&dir, "response.json", response).await {
            tracing::warn!(invocation_id, error = %e, "failed to capture LLM response");
        }
        match serde_json::to_value(meta) {
            Ok(value) => {
                if let Err(e) = write_json(&dir, "metadata.json", &value).await {
                    tracing::warn!(invocation_id, error = %e, "failed to capture invocation metadata");
                }
            }
            Err(e) => {
                tracing::warn!(invocation_id, error = %e, "failed to serialize invocation metadata");
            }
        }
    }

    /// Persist one tool execution: command, stdin, streams, exit code,
    /// duration. `command.txt` is shell-quoted for human reading only.
    pub async fn write_tool_execution(&self, exec_id: &str, capture: &ToolExecutionCapture<'_>) {
        let dir = self.tool_execution_dir(exec_id);
        let result: std::io::Result<()> = async {
            tokio::fs::create_dir_all(&dir).await?;
            let display = shell_words::join(capture.command.iter().map(String::as_str));
            tokio::fs::write(dir.join("command.txt"), display).await?;
            tokio::fs::write(dir.join("stdin.log"), capture.stdin.unwrap_or("")).await?;
            tokio::fs::write(dir.join("stdout.log"), capture.stdout).await?;
            tokio::fs::write(dir.join("stderr.log"), capture.stderr).await?;
            tokio::fs::write(dir.join("exit_code.txt"), capture.exit_code.to_string()).await?;
            tokio::fs::write(dir.join("duration_ms.txt"), capture.duration_ms.to_string()).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(exec_id, error = %e, "failed to capture tool execution");
        }
    }
}

async fn write_json(dir: &Path, name: &str, value: &serde_json::Value) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let bytes = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    tokio::fs::write(dir.join(name), bytes).await
}

#![deny(missing_docs)]
//! Lifecycle hooks over file IPC.
//!
//! A hook is an external program the engine runs at a lifecycle point.
//! The contract is a directory, not a protocol: the engine materializes
//! `input/` (what the hook may read), the hook writes `output/`
//! (`control.json`, and for `pre_llm_req` optionally
//! `final_payload.json`), and the engine captures `execution_meta/`
//! regardless of what the hook did.
//!
//! Hooks are advisory by construction. A hook that exits non-zero, times
//! out, or emits malformed output degrades to "nothing happened" — the
//! engine logs a warning and proceeds with the baseline behavior. The
//! only interventions a hook can make are the ones the engine explicitly
//! reads back: a payload override at `pre_llm_req`, and skip/abort at
//! `pre_tool_exec`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use delta_types::{HookPhase, HookSpec, HookStatus};
use serde::{Deserialize, Serialize};

/// Wall-clock ceiling for a hook subprocess unless its spec overrides it.
pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 30_000;

/// The `output/control.json` a hook may write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookControl {
    /// What the hook wants the engine to do.
    #[serde(default)]
    pub action: ControlAction,
    /// Skip the pending tool call. Honored at `pre_tool_exec` only.
    #[serde(default)]
    pub skip: bool,
    /// Free-form explanation, surfaced in observations and logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The `action` field of `control.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlAction {
    /// Proceed normally.
    #[default]
    Continue,
    /// Suppress the pending tool call (at `pre_tool_exec`; advisory
    /// elsewhere).
    Abort,
}

/// What one hook invocation produced.
#[derive(Debug, Clone)]
pub struct HookOutcome {
    /// SUCCESS iff the subprocess exited 0.
    pub status: HookStatus,
    /// Parsed `control.json`, or defaults when absent or malformed.
    pub control: HookControl,
    /// Parsed `final_payload.json`. Populated only for `pre_llm_req`,
    /// only on SUCCESS, only when the file is valid JSON.
    pub final_payload: Option<serde_json::Value>,
    /// Hook I/O directory, relative to the run directory. Journaled as
    /// `io_path_ref`.
    pub io_path: String,
    /// Wall-clock duration of the subprocess.
    pub duration_ms: u64,
    /// Why the hook failed or degraded, for WARN logging.
    pub detail: Option<String>,
}

/// Executes the hooks configured for a run.
pub struct HookRunner {
    run_id: String,
    run_dir: PathBuf,
    workspace: PathBuf,
    hooks: BTreeMap<HookPhase, HookSpec>,
}

impl HookRunner {
    /// Create a runner for one run.
    pub fn new(
        run_id: impl Into<String>,
        run_dir: &Path,
        workspace: &Path,
        hooks: BTreeMap<HookPhase, HookSpec>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            run_dir: run_dir.to_path_buf(),
            workspace: workspace.to_path_buf(),
            hooks,
        }
    }

    /// Whether a hook is registered for `phase`.
    pub fn has(&self, phase: HookPhase) -> bool {
        self.hooks.contains_key(&phase)
    }

    /// Run the hook for `phase`, if one is configured.
    ///
    /// `seq` is the journal seq the invocation is associated with (used
    /// in the directory name, keeping hook dirs sortable alongside the
    /// journal). `payload` is the phase-specific input document.
    pub async fn run(
        &self,
        phase: HookPhase,
        seq: u64,
        payload: &serde_json::Value,
    ) -> Option<HookOutcome> {
        let spec = self.hooks.get(&phase)?;
        Some(self.run_spec(spec, phase, seq, payload).await)
    }

    async fn run_spec(
        &self,
        spec: &HookSpec,
        phase: HookPhase,
        seq: u64,
        payload: &serde_json::Value,
    ) -> HookOutcome {
        let start = Instant::now();
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let rel_path = format!("io/hooks/{seq}_{phase}_{}", &uuid[..8]);
        let io_dir = self.run_dir.join(&rel_path);

        if let Err(e) = self.populate_input(&io_dir, phase, seq, payload).await {
            tracing::warn!(phase = %phase, error = %e, "hook I/O setup failed");
            return HookOutcome {
                status: HookStatus::Failed,
                control: HookControl::default(),
                final_payload: None,
                io_path: rel_path,
                duration_ms: elapsed_ms(start),
                detail: Some(format!("hook I/O setup failed: {e}")),
            };
        }

        let (status, mut detail) = self.spawn_and_wait(spec, &io_dir, start).await;
        let duration_ms = elapsed_ms(start);

        let control = match read_json(&io_dir.join("output").join("control.json")).await {
            ReadJson::Parsed(value) => match serde_json::from_value::<HookControl>(value) {
                Ok(control) => control,
                Err(e) => {
                    detail.get_or_insert_with(|| format!("malformed control.json: {e}"));
                    HookControl::default()
                }
            },
            ReadJson::Malformed(e) => {
                detail.get_or_insert_with(|| format!("malformed control.json: {e}"));
                HookControl::default()
            }
            ReadJson::Absent => HookControl::default(),
        };

        // A payload override is only trusted from a hook that succeeded.
        let final_payload = if phase == HookPhase::PreLlmReq && status == HookStatus::Success {
            match read_json(&io_dir.join("output").join("final_payload.json")).await {
                ReadJson::Parsed(value) => Some(value),
                ReadJson::Malformed(e) => {
                    detail.get_or_insert_with(|| format!("malformed final_payload.json: {e}"));
                    None
                }
                ReadJson::Absent => None,
            }
        } else {
            None
        };

        HookOutcome {
            status,
            control,
            final_payload,
            io_path: rel_path,
            duration_ms,
            detail,
        }
    }

    async fn populate_input(
        &self,
        io_dir: &Path,
        phase: HookPhase,
        seq: u64,
        payload: &serde_json::Value,
    ) -> std::io::Result<()> {
        let input = io_dir.join("input");
        tokio::fs::create_dir_all(&input).await?;
        tokio::fs::create_dir_all(io_dir.join("output")).await?;
        tokio::fs::create_dir_all(io_dir.join("execution_meta")).await?;

        let context = serde_json::json!({
            "phase": phase.as_str(),
            "seq": seq,
            "run_id": self.run_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "cwd": self.workspace.display().to_string(),
        });
        tokio::fs::write(
            input.join("context.json"),
            serde_json::to_vec_pretty(&context).unwrap_or_default(),
        )
        .await?;

        let payload_name = if phase == HookPhase::PreLlmReq {
            "proposed_payload.json"
        } else {
            "payload.json"
        };
        tokio::fs::write(
            input.join(payload_name),
            serde_json::to_vec_pretty(payload).unwrap_or_default(),
        )
        .await?;
        Ok(())
    }

    async fn spawn_and_wait(
        &self,
        spec: &HookSpec,
        io_dir: &Path,
        start: Instant,
    ) -> (HookStatus, Option<String>) {
        let meta = io_dir.join("execution_meta");
        let display = shell_words::join(spec.command.iter().map(String::as_str));
        let _ = tokio::fs::write(meta.join("command.txt"), &display).await;

        if spec.command.is_empty() {
            let _ = tokio::fs::write(meta.join("exit_code.txt"), "-1").await;
            return (HookStatus::Failed, Some("hook command is empty".into()));
        }

        let timeout_ms = spec.timeout_ms.unwrap_or(DEFAULT_HOOK_TIMEOUT_MS);
        let mut command = tokio::process::Command::new(&spec.command[0]);
        command
            .args(&spec.command[1..])
            .current_dir(&self.workspace)
            .env("DELTA_RUN_ID", &self.run_id)
            .env("DELTA_HOOK_IO_PATH", io_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = tokio::fs::write(meta.join("exit_code.txt"), "-1").await;
                let _ = write_duration(&meta, start).await;
                return (
                    HookStatus::Failed,
                    Some(format!("failed to spawn hook: {e}")),
                );
            }
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait_with_output())
            .await
        {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let _ = tokio::fs::write(meta.join("stdout.log"), &output.stdout).await;
                let _ = tokio::fs::write(meta.join("stderr.log"), &output.stderr).await;
                let _ = tokio::fs::write(meta.join("exit_code.txt"), exit_code.to_string()).await;
                let _ = write_duration(&meta, start).await;
                if output.status.success() {
                    (HookStatus::Success, None)
                } else {
                    (
                        HookStatus::Failed,
                        Some(format!("hook exited with code {exit_code}")),
                    )
                }
            }
            Ok(Err(e)) => {
                let _ = tokio::fs::write(meta.join("exit_code.txt"), "-1").await;
                let _ = write_duration(&meta, start).await;
                (
                    HookStatus::Failed,
                    Some(format!("failed to collect hook output: {e}")),
                )
            }
            Err(_) => {
                let _ = tokio::fs::write(meta.join("exit_code.txt"), "-1").await;
                let _ = write_duration(&meta, start).await;
                (
                    HookStatus::Failed,
                    Some(format!("hook timed out after {timeout_ms} ms")),
                )
            }
        }
    }
}

enum ReadJson {
    Parsed(serde_json::Value),
    Malformed(String),
    Absent,
}

async fn read_json(path: &Path) -> ReadJson {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => ReadJson::Parsed(value),
            Err(e) => ReadJson::Malformed(e.to_string()),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ReadJson::Absent,
        Err(e) => ReadJson::Malformed(e.to_string()),
    }
}

async fn write_duration(meta: &Path, start: Instant) -> std::io::Result<()> {
    tokio::fs::write(
        meta.join("duration_ms.txt"),
        elapsed_ms(start).to_string(),
    )
    .await
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

//! Journal events — the append-only record of everything a run did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of `journal.jsonl`.
///
/// `seq` is assigned by the engine loop: strictly increasing, gap-free,
/// starting at 1. `timestamp` is RFC3339 UTC. The payload carries the
/// event type and its type-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEvent {
    /// Monotonic sequence number, 1-based.
    pub seq: u64,
    /// When the event was appended.
    pub timestamp: DateTime<Utc>,
    /// The event type and payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl JournalEvent {
    /// Create an event stamped with the current time.
    pub fn new(seq: u64, payload: EventPayload) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// The event types a journal may contain.
///
/// Wire form: `{"type": "ACTION_REQUEST", "payload": {...}}`, one compact
/// JSON object per line. Variant and field names here ARE the on-disk
/// format — renaming one is a journal format break.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    /// First event of every journal, exactly once.
    RunStart {
        /// The task the agent was asked to perform.
        task: String,
        /// Reference to the agent definition (its root directory).
        agent_ref: String,
    },
    /// One reasoning step from the model.
    Thought {
        /// The assistant's text content. May be empty when the model
        /// went straight to tool calls.
        content: String,
        /// Invocation id linking to `io/invocations/<id>/`.
        llm_invocation_ref: String,
    },
    /// The model asked for a tool to run.
    ActionRequest {
        /// Opaque tool-call id from the model.
        action_id: String,
        /// Name of the requested tool.
        tool_name: String,
        /// The model-supplied arguments.
        tool_args: serde_json::Value,
        /// Human-readable rendering of the command that will run.
        resolved_command: String,
    },
    /// The observation produced for an earlier request.
    ActionResult {
        /// Matches the `action_id` of the request.
        action_id: String,
        /// How the execution went.
        status: ActionStatus,
        /// What the model will see. Capped; the full text lives in the
        /// audit store.
        observation_content: String,
        /// Execution id linking to `io/tool_executions/<id>/`, when a
        /// subprocess actually ran.
        execution_ref: Option<String>,
    },
    /// Engine-level diagnostics the model never sees.
    SystemMessage {
        /// Severity.
        level: SystemLevel,
        /// The message.
        message: String,
    },
    /// Record of one lifecycle hook invocation.
    HookExecutionAudit {
        /// The phase name, e.g. `pre_tool_exec`.
        hook_name: String,
        /// Derived from the hook's exit code.
        status: HookStatus,
        /// Path of the hook I/O directory, relative to the run directory.
        io_path_ref: String,
        /// Wall-clock duration of the hook subprocess.
        duration_ms: u64,
    },
    /// Terminal event of a liveness cycle. Legitimately absent from
    /// journals of crashed or paused runs.
    RunEnd {
        /// How the run ended.
        status: RunStatus,
        /// The model's final answer, when there is one.
        #[serde(skip_serializing_if = "Option::is_none")]
        final_response: Option<String>,
        /// The fatal error, when the run failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl EventPayload {
    /// The wire name of this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "RUN_START",
            Self::Thought { .. } => "THOUGHT",
            Self::ActionRequest { .. } => "ACTION_REQUEST",
            Self::ActionResult { .. } => "ACTION_RESULT",
            Self::SystemMessage { .. } => "SYSTEM_MESSAGE",
            Self::HookExecutionAudit { .. } => "HOOK_EXECUTION_AUDIT",
            Self::RunEnd { .. } => "RUN_END",
        }
    }
}

/// Outcome classification of one tool execution.
///
/// SUCCESS = exit 0. FAILED = the subprocess ran and failed (non-zero
/// exit, timeout). ERROR = the engine could not run it at all (unknown
/// tool, spawn failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    /// Exit code 0.
    Success,
    /// Ran, but failed.
    Failed,
    /// Could not run.
    Error,
}

/// Severity of a [`EventPayload::SystemMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemLevel {
    /// Informational.
    Info,
    /// Something degraded but the loop continues.
    Warn,
    /// Fatal to the run.
    Error,
}

/// Outcome of one hook subprocess, derived from its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookStatus {
    /// Exit code 0.
    Success,
    /// Non-zero exit, timeout, or spawn failure.
    Failed,
}

/// Lifecycle state of a run. Shared by `metadata.json` and RUN_END.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// The owning process believes it is still driving the loop.
    Running,
    /// Terminated normally (final answer or iteration ceiling).
    Completed,
    /// Terminated on a fatal error.
    Failed,
    /// The owning process died; patched by the janitor on resume.
    Interrupted,
    /// Paused for an async `ask_human` exchange; exit code 101.
    WaitingForInput,
}

impl RunStatus {
    /// Whether this status ends a liveness cycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// The process exit code the CLI maps this status to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::WaitingForInput => 101,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_wire_format_is_tagged_type_payload() {
        let event = JournalEvent::new(
            1,
            EventPayload::RunStart {
                task: "say hi".into(),
                agent_ref: "/agents/hello".into(),
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["seq"], 1);
        assert_eq!(value["type"], "RUN_START");
        assert_eq!(value["payload"]["task"], "say hi");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn statuses_serialize_screaming() {
        assert_eq!(
            serde_json::to_value(RunStatus::WaitingForInput).unwrap(),
            json!("WAITING_FOR_INPUT")
        );
        assert_eq!(
            serde_json::to_value(ActionStatus::Failed).unwrap(),
            json!("FAILED")
        );
        assert_eq!(
            serde_json::to_value(SystemLevel::Warn).unwrap(),
            json!("WARN")
        );
    }

    #[test]
    fn run_end_omits_absent_fields() {
        let event = JournalEvent::new(
            3,
            EventPayload::RunEnd {
                status: RunStatus::Completed,
                final_response: Some("hello".into()),
                error: None,
            },
        );
        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains("\"final_response\":\"hello\""));
        assert!(!line.contains("\"error\""));
    }

    #[test]
    fn roundtrip_action_events() {
        let request = JournalEvent::new(
            4,
            EventPayload::ActionRequest {
                action_id: "call_1".into(),
                tool_name: "echo".into(),
                tool_args: json!({"msg": "x"}),
                resolved_command: "echo x".into(),
            },
        );
        let line = serde_json::to_string(&request).unwrap();
        let back: JournalEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn exit_codes_match_the_external_contract() {
        assert_eq!(RunStatus::Completed.exit_code(), 0);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
        assert_eq!(RunStatus::WaitingForInput.exit_code(), 101);
    }
}

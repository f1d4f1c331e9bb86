//! Agent configuration — read-only during a run.
//!
//! These are the shapes `delta-config` parses YAML into. Tool sugar
//! (`exec:`/`shell:`) is expanded by `delta-tool` before a
//! [`ToolDefinition`] reaches the executor, so everything here is already
//! in normalized form.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A fully resolved agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name, for humans and logs.
    pub name: String,
    /// Agent version string.
    pub version: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Model settings.
    pub llm: LlmConfig,
    /// Normalized tool definitions.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Ceiling on Think→Act→Observe iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Lifecycle hooks by phase. `hooks.yaml` overrides this wholesale.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lifecycle_hooks: BTreeMap<HookPhase, HookSpec>,
}

impl AgentConfig {
    /// Look up a tool by name.
    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }
}

fn default_max_iterations() -> u32 {
    30
}

/// Model settings for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier, passed through to the provider.
    pub model: String,
    /// Sampling temperature, 0–2.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional completion-token ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f64 {
    0.7
}

/// A declaratively defined external command the model can invoke.
///
/// `command[0]` is the program; the rest are leading fixed arguments.
/// `${AGENT_HOME}` anywhere in a command entry is substituted with the
/// agent root at invocation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name, as offered to the model.
    pub name: String,
    /// Program and leading fixed arguments.
    pub command: Vec<String>,
    /// Declared parameters, in declaration order.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Name of the parameter piped to stdin, if any. At most one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_parameter: Option<String>,
    /// Per-tool override of the execution timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Description offered to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One declared tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name, as the model supplies it.
    pub name: String,
    /// Parameter type. Only "string" is defined today.
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    /// How the value reaches the subprocess.
    pub inject_as: InjectAs,
    /// Flag name, required when `inject_as` is `option`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_name: Option<String>,
    /// Positional index recorded by sugar expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Description offered to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_param_type() -> String {
    "string".into()
}

/// The three injection channels for a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectAs {
    /// Appended as a bare argv element.
    Argument,
    /// Appended as `[option_name, value]`.
    Option,
    /// Piped to the subprocess's stdin.
    Stdin,
}

/// The lifecycle points at which external hooks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    /// Before each LLM call; may replace the outbound payload.
    PreLlmReq,
    /// After each LLM response; advisory.
    PostLlmResp,
    /// Before each tool execution; may skip the tool.
    PreToolExec,
    /// After each tool execution; advisory.
    PostToolExec,
    /// On fatal loop error only.
    OnError,
    /// Once, just before RUN_END is written.
    OnRunEnd,
}

impl HookPhase {
    /// The snake_case wire name, used in directory names and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreLlmReq => "pre_llm_req",
            Self::PostLlmResp => "post_llm_resp",
            Self::PreToolExec => "pre_tool_exec",
            Self::PostToolExec => "post_tool_exec",
            Self::OnError => "on_error",
            Self::OnRunEnd => "on_run_end",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An external program registered at a lifecycle point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSpec {
    /// Program and fixed arguments.
    pub command: Vec<String>,
    /// Per-hook override of the execution timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

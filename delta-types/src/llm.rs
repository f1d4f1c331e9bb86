//! The LLM wire contract — OpenAI Chat Completions tool calling.
//!
//! The engine builds a [`ChatRequest`], serializes it, offers it to the
//! `pre_llm_req` hook, and hands whatever JSON survives to a [`Provider`].
//! The provider sends those bytes verbatim — a hook override therefore
//! reaches the wire byte-for-byte, which is why [`Provider::chat`] takes a
//! `serde_json::Value` rather than the typed request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Message roles, serialized lowercase as the wire expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and context blocks.
    System,
    /// The human (or the task).
    User,
    /// The model.
    Assistant,
    /// A tool observation, keyed by `tool_call_id`.
    Tool,
}

/// One chat message, already in wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who is speaking.
    pub role: Role,
    /// Text content. `None` for assistant messages that only carry
    /// tool calls.
    pub content: Option<String>,
    /// Tool calls attached to an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallPayload>>,
    /// For role `tool`: the id of the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// An assistant message with optional text and tool calls.
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallPayload>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        }
    }

    /// A tool observation answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool call as it appears inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    /// Opaque call id from the model.
    pub id: String,
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub call_type: String,
    /// The function being called.
    pub function: FunctionCall,
}

impl ToolCallPayload {
    /// Build a function-type tool call.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }
}

/// Function name plus JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// The tool name.
    pub name: String,
    /// Arguments as a JSON-encoded string, per the wire format.
    pub arguments: String,
}

/// One entry of the request's `tools` array (OpenAI function schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub schema_type: String,
    /// The function declaration.
    pub function: FunctionSchema,
}

/// The declaration inside a [`ToolSchema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    /// Tool name.
    pub name: String,
    /// Description offered to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// Build a function schema entry.
    pub fn function(
        name: impl Into<String>,
        description: Option<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            schema_type: "function".into(),
            function: FunctionSchema {
                name: name.into(),
                description,
                parameters,
            },
        }
    }
}

/// The request the engine composes each iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion-token ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// The composed conversation.
    pub messages: Vec<ChatMessage>,
    /// Tools offered to the model. Omitted when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
}

/// The assistant message distilled from a provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantMessage {
    /// Text content, if any.
    pub content: Option<String>,
    /// Tool invocations, with arguments already parsed and normalized.
    pub tool_calls: Vec<ToolInvocation>,
}

/// One tool invocation extracted from the response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Opaque call id from the model.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Parsed arguments object.
    pub arguments: serde_json::Value,
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Completion tokens.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Total tokens.
    #[serde(default)]
    pub total_tokens: u64,
}

/// Everything the engine needs back from one LLM call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// The distilled assistant message.
    pub message: AssistantMessage,
    /// The raw response body, persisted to the audit store.
    pub raw_response: serde_json::Value,
    /// Token usage, when the provider reported it.
    pub usage: Option<TokenUsage>,
}

/// The LLM client boundary.
///
/// `payload` is the final post-hook request JSON; implementations send it
/// verbatim. Retry and rate limiting are deliberately not part of this
/// contract.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Execute one chat completion.
    async fn chat(&self, payload: &serde_json::Value) -> Result<ChatOutcome, ProviderError>;
}

/// Normalize a raw tool-argument string from the wire.
///
/// Models occasionally emit `""`, `"undefined"`, or `"null"` instead of an
/// arguments object; all of those (and anything unparseable) become `{}` so
/// dispatch never sees a non-object.
pub fn normalize_tool_arguments(raw: Option<&str>) -> serde_json::Value {
    let Some(raw) = raw else {
        return serde_json::json!({});
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "undefined" || trimmed == "null" {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) if value.is_object() => value,
        _ => serde_json::json!({}),
    }
}

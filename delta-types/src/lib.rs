#![deny(missing_docs)]
//! # delta-types — the shared vocabulary of the Delta Engine
//!
//! Everything the engine writes to disk or sends over the wire is defined
//! here: journal events, run metadata, agent configuration, the context
//! manifest, and the Chat Completions request/response shapes.
//!
//! | Area | Types | Where it is used |
//! |------|-------|------------------|
//! | Journal | [`JournalEvent`], [`EventPayload`] | `delta-journal`, the engine loop |
//! | Metadata | [`RunMetadata`], [`RunStatus`] | `delta-journal`, the janitor |
//! | Configuration | [`AgentConfig`], [`ToolDefinition`] | `delta-config`, `delta-tool` |
//! | Context | [`ContextManifest`], [`ContextSource`] | `delta-context` |
//! | LLM wire | [`ChatRequest`], [`Provider`] | `delta-provider-openai`, the engine loop |
//!
//! ## Design principle
//!
//! The journal is the single source of truth for a run, so every type that
//! reaches it is serde-stable: tagged enums with explicit wire names, no
//! positional encoding, no implementation-detail fields. A journal written
//! by one engine build must replay under the next.

pub mod config;
pub mod error;
pub mod event;
pub mod llm;
pub mod manifest;
pub mod metadata;

pub use config::{AgentConfig, HookPhase, HookSpec, InjectAs, LlmConfig, Parameter, ToolDefinition};
pub use error::{
    ConfigError, ContextError, EngineError, JournalError, ProviderError, ToolError,
};
pub use event::{ActionStatus, EventPayload, HookStatus, JournalEvent, RunStatus, SystemLevel};
pub use llm::{
    normalize_tool_arguments, AssistantMessage, ChatMessage, ChatOutcome, ChatRequest,
    FunctionCall, FunctionSchema, Provider, Role, TokenUsage, ToolCallPayload, ToolInvocation,
    ToolSchema,
};
pub use manifest::{ContextManifest, ContextSource, GeneratorSpec, OnMissing};
pub use metadata::RunMetadata;

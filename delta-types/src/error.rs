//! Error types for each engine boundary.
//!
//! The propagation policy: tool and hook failures become journal events
//! and observations, never errors. Only configuration problems, journal
//! corruption, and LLM transport failures cross the engine boundary.

use thiserror::Error;

/// Journal and metadata store errors. All fatal.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum JournalError {
    /// The file on disk is not a valid append-only journal.
    ///
    /// External tools have historically rewritten `journal.jsonl` as a
    /// JSON array or pretty-printed it; both corrupt the append contract.
    #[error(
        "journal format violation in {path}: {reason}. \
         Restore the file from backup or delete the run directory."
    )]
    FormatViolation {
        /// The offending file.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Sequence numbers are not contiguous from 1.
    #[error("journal corrupted in {path}: expected seq {expected}, found {found}")]
    SequenceGap {
        /// The offending file.
        path: String,
        /// The seq that should have appeared.
        expected: u64,
        /// The seq that did.
        found: u64,
    },

    /// A line failed to parse as a journal event.
    #[error("journal corrupted in {path} at line {line}: {reason}")]
    MalformedLine {
        /// The offending file.
        path: String,
        /// 1-based line number.
        line: usize,
        /// Parse failure detail.
        reason: String,
    },

    /// Metadata already exists where a new run expected none.
    #[error("metadata already initialized at {0}")]
    AlreadyInitialized(String),

    /// Metadata is missing or unreadable.
    #[error("metadata unreadable: {0}")]
    Metadata(String),

    /// Underlying filesystem failure.
    #[error("journal I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Event (de)serialization failure.
    #[error("journal serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration errors. Surfaced before or at run start; prevent the run.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No agent configuration file was found.
    #[error("no agent.yaml or config.yaml under {0}")]
    NotFound(String),

    /// A configuration file failed to parse.
    #[error("invalid YAML in {path}: {reason}")]
    InvalidYaml {
        /// The offending file.
        path: String,
        /// Parser detail.
        reason: String,
    },

    /// A structurally valid file violated a schema rule.
    #[error("invalid configuration in {path}: {reason}")]
    Invalid {
        /// The offending file.
        path: String,
        /// The violated rule.
        reason: String,
    },

    /// An import path was absolute or escaped the agent root.
    #[error("import path not allowed: {0} (must be relative, no '..')")]
    BadImportPath(String),

    /// Imports form a cycle.
    #[error("circular import detected at {0}")]
    CircularImport(String),

    /// A tool sugar template was malformed.
    #[error("invalid tool template for '{tool}': {reason}")]
    BadTemplate {
        /// The tool being expanded.
        tool: String,
        /// What was wrong.
        reason: String,
    },

    /// Underlying filesystem failure.
    #[error("configuration I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Tool composition and spawn errors.
///
/// Execution failures (non-zero exit, timeout) are NOT errors — they are
/// results with `success == false`. This type covers what prevents a
/// subprocess from being composed or started at all.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool is not in the agent configuration.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// A required parameter was absent.
    #[error("missing required parameter '{parameter}' for tool '{tool}'")]
    MissingParameter {
        /// The tool being invoked.
        tool: String,
        /// The absent parameter.
        parameter: String,
    },

    /// The definition itself is unusable (empty command, duplicate stdin).
    #[error("invalid tool definition '{tool}': {reason}")]
    InvalidDefinition {
        /// The offending tool.
        tool: String,
        /// The violated rule.
        reason: String,
    },
}

/// Context composition errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ContextError {
    /// A `file` source with `on_missing: error` had no file.
    #[error("context source '{id}' missing: {path}")]
    SourceMissing {
        /// Source id (or its path when unnamed).
        id: String,
        /// The expanded path that was absent.
        path: String,
    },

    /// The journal could not be replayed into messages.
    #[error("journal replay failed: {0}")]
    Replay(String),

    /// Underlying filesystem failure.
    #[error("context I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM transport errors. Fatal for the iteration.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No API key was resolvable from the environment.
    #[error("no API key: set DELTA_API_KEY or OPENAI_API_KEY")]
    MissingApiKey,

    /// Network-level failure.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Non-success HTTP status from the API.
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, as returned.
        body: String,
    },

    /// The response did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Top-level engine errors — what `Engine::run` can fail with.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration problems (category 1).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Journal corruption or I/O (category 2).
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// Context build failure.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// LLM transport failure (category 5).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The janitor refused to take over an existing run.
    #[error("resume refused: {0}")]
    ResumeRefused(String),

    /// Underlying filesystem failure outside the journal.
    #[error("engine I/O: {0}")]
    Io(#[from] std::io::Error),
}

//! The context manifest — what goes in front of the model, in order.

use serde::{Deserialize, Serialize};

/// Parsed `context.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextManifest {
    /// Sources, evaluated in declaration order.
    pub sources: Vec<ContextSource>,
}

impl ContextManifest {
    /// Whether any source replays the journal. When none does, the
    /// composer appends the full conversation rebuild anyway.
    pub fn has_journal_source(&self) -> bool {
        self.sources
            .iter()
            .any(|s| matches!(s, ContextSource::Journal { .. }))
    }
}

/// One entry in the manifest.
///
/// Path strings honor `${AGENT_HOME}` (agent root) and `${CWD}` (run
/// working directory).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextSource {
    /// A static file, wrapped as one system message.
    File {
        /// Label used in the `# Context Block:` prefix.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Path to read.
        path: String,
        /// What a missing file means.
        #[serde(default)]
        on_missing: OnMissing,
    },
    /// A file produced by a generator subprocess just before the LLM call.
    ComputedFile {
        /// Label used in the `# Context Block:` prefix.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// The generator to run.
        generator: GeneratorSpec,
        /// Where the generator leaves its output.
        output_path: String,
        /// What a missing output (or failed generator) means.
        #[serde(default)]
        on_missing: OnMissing,
    },
    /// The conversation so far, rebuilt from the journal.
    Journal {
        /// Unused today; reserved for symmetry with the other sources.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Keep only the last N THOUGHT groups.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<u32>,
    },
}

/// The subprocess behind a `computed_file` source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSpec {
    /// Program and fixed arguments.
    pub command: Vec<String>,
    /// Wall-clock ceiling for the generator.
    #[serde(default = "default_generator_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_generator_timeout_ms() -> u64 {
    30_000
}

/// Policy for a source whose file is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnMissing {
    /// Fail the context build.
    #[default]
    Error,
    /// Contribute nothing.
    Skip,
}

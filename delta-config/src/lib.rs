#![deny(missing_docs)]
//! Configuration loading for the Delta Engine.
//!
//! An agent is a directory: `agent.yaml` (or legacy `config.yaml`) with
//! the model settings and tool definitions, an optional sibling
//! `hooks.yaml` that overrides in-config lifecycle hooks, and a required
//! `context.yaml` naming the context sources. All of it is parsed here,
//! up front — every configuration error surfaces before the run starts.
//!
//! Tool definitions arrive in three equivalent shapes (explicit,
//! `exec:` sugar, `shell:` sugar); the sugar forms are expanded through
//! `delta-tool` so the rest of the engine only ever sees the normalized
//! `command + parameters` form.

mod agent;
mod env;

pub use agent::{load_agent_config, AGENT_FILE_NAMES, HOOKS_FILE_NAME};
pub use env::LlmEnv;

use std::path::Path;

use delta_types::{ConfigError, ContextManifest};

/// File name of the context manifest.
pub const CONTEXT_FILE_NAME: &str = "context.yaml";

/// Load the agent's context manifest. `context.yaml` is required; agents
/// without a `journal` source still get the full conversation fallback
/// from the composer.
pub fn load_context_manifest(agent_home: &Path) -> Result<ContextManifest, ConfigError> {
    let path = agent_home.join(CONTEXT_FILE_NAME);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::Invalid {
                path: path.display().to_string(),
                reason: "context.yaml is required".into(),
            }
        } else {
            ConfigError::Io(e)
        }
    })?;
    let manifest: ContextManifest =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::InvalidYaml {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    if manifest.sources.is_empty() {
        return Err(ConfigError::Invalid {
            path: path.display().to_string(),
            reason: "sources must not be empty".into(),
        });
    }
    Ok(manifest)
}

//! `.env` layering and LLM credential resolution.
//!
//! Layering, least to most specific: process environment, then the
//! project root's `.env` (where the engine was invoked), then the agent's,
//! then the workspace's. More-specific files override less-specific ones;
//! the process environment has the lowest precedence of all.

use std::collections::HashMap;
use std::path::Path;

/// LLM connection settings resolved from the environment layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlmEnv {
    /// `DELTA_API_KEY`, falling back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// `DELTA_BASE_URL`, falling back to `OPENAI_API_URL`.
    pub base_url: Option<String>,
}

impl LlmEnv {
    /// Resolve against the standard layers for a run.
    pub fn resolve(workspace: &Path, agent_home: &Path) -> Self {
        let project = std::env::current_dir().ok();
        let mut dirs: Vec<&Path> = Vec::new();
        if let Some(project) = project.as_deref() {
            dirs.push(project);
        }
        dirs.push(agent_home);
        dirs.push(workspace);
        Self::from_layers(std::env::vars(), &dirs)
    }

    /// Resolve from an explicit base environment and `.env` directories,
    /// ordered least to most specific.
    pub fn from_layers(
        base: impl Iterator<Item = (String, String)>,
        dirs: &[&Path],
    ) -> Self {
        let mut env: HashMap<String, String> = base.collect();
        for dir in dirs {
            let path = dir.join(".env");
            match dotenvy::from_path_iter(&path) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        env.insert(entry.0, entry.1);
                    }
                }
                Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable .env");
                }
            }
        }

        let pick = |primary: &str, fallback: &str| {
            env.get(primary)
                .or_else(|| env.get(fallback))
                .filter(|v| !v.is_empty())
                .cloned()
        };
        Self {
            api_key: pick("DELTA_API_KEY", "OPENAI_API_KEY"),
            base_url: pick("DELTA_BASE_URL", "OPENAI_API_URL"),
        }
    }
}

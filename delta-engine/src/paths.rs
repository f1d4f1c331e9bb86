//! The run directory layout under `<workspace>/.delta/<run_id>/`.

use std::path::{Path, PathBuf};

/// Name of the engine's state directory inside a workspace.
pub const DELTA_DIR_NAME: &str = ".delta";

/// Well-known paths of one run directory.
#[derive(Debug, Clone)]
pub struct RunPaths {
    run_dir: PathBuf,
}

impl RunPaths {
    /// Paths for `run_id` inside `workspace`.
    pub fn new(workspace: &Path, run_id: &str) -> Self {
        Self {
            run_dir: workspace.join(DELTA_DIR_NAME).join(run_id),
        }
    }

    /// The run directory itself.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// `journal.jsonl`.
    pub fn journal(&self) -> PathBuf {
        self.run_dir.join(delta_journal::JOURNAL_FILE_NAME)
    }

    /// `engine.log`, the human-readable trace.
    pub fn engine_log(&self) -> PathBuf {
        self.run_dir.join("engine.log")
    }

    /// The ephemeral ask-human exchange directory.
    pub fn interaction_dir(&self) -> PathBuf {
        self.run_dir.join("interaction")
    }

    /// `interaction/request.json`, written when the run pauses.
    pub fn interaction_request(&self) -> PathBuf {
        self.interaction_dir().join("request.json")
    }

    /// `interaction/response.txt`, written by the human.
    pub fn interaction_response(&self) -> PathBuf {
        self.interaction_dir().join("response.txt")
    }

    /// Where `computed_file` generators are expected to leave output.
    pub fn context_artifacts(&self) -> PathBuf {
        self.run_dir.join("context_artifacts")
    }
}

#![deny(missing_docs)]
//! Context composition — the model's input, rebuilt from disk every
//! iteration.
//!
//! The composer evaluates the manifest's sources in declaration order and
//! concatenates their messages. Given the same bytes on disk it returns
//! the same messages, byte for byte; nothing here consults a clock or an
//! id generator. `computed_file` generators may of course be
//! non-deterministic — the composer takes whatever they produced at that
//! moment.
//!
//! Agents that omit an explicit `journal` source still need conversation
//! history, so the full rebuild is appended as a fallback in that case.

mod replay;

pub use replay::rebuild_conversation;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use delta_types::{
    ChatMessage, ContextError, ContextManifest, ContextSource, GeneratorSpec, JournalEvent,
    OnMissing,
};

/// Composes the message list for one LLM call.
pub struct ContextBuilder {
    manifest: ContextManifest,
    agent_home: PathBuf,
    workspace: PathBuf,
    run_id: String,
}

impl ContextBuilder {
    /// Create a builder for one run.
    pub fn new(
        manifest: ContextManifest,
        agent_home: &Path,
        workspace: &Path,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            manifest,
            agent_home: agent_home.to_path_buf(),
            workspace: workspace.to_path_buf(),
            run_id: run_id.into(),
        }
    }

    /// Evaluate every source in order and concatenate the results.
    pub async fn build(&self, events: &[JournalEvent]) -> Result<Vec<ChatMessage>, ContextError> {
        let mut messages = Vec::new();
        for source in &self.manifest.sources {
            match source {
                ContextSource::File {
                    id,
                    path,
                    on_missing,
                } => {
                    if let Some(message) = self.file_block(id.as_deref(), path, *on_missing).await?
                    {
                        messages.push(message);
                    }
                }
                ContextSource::ComputedFile {
                    id,
                    generator,
                    output_path,
                    on_missing,
                } => {
                    self.run_generator(generator).await;
                    if let Some(message) = self
                        .file_block(id.as_deref(), output_path, *on_missing)
                        .await?
                    {
                        messages.push(message);
                    }
                }
                ContextSource::Journal { max_iterations, .. } => {
                    messages.extend(rebuild_conversation(events, *max_iterations));
                }
            }
        }

        if !self.manifest.has_journal_source() {
            messages.extend(rebuild_conversation(events, None));
        }

        Ok(messages)
    }

    /// Read one file source into a `# Context Block:` system message.
    async fn file_block(
        &self,
        id: Option<&str>,
        path: &str,
        on_missing: OnMissing,
    ) -> Result<Option<ChatMessage>, ContextError> {
        let resolved = self.resolve_path(path);
        match tokio::fs::read_to_string(&resolved).await {
            Ok(contents) => {
                let label = id.unwrap_or(path);
                Ok(Some(ChatMessage::system(format!(
                    "# Context Block: {label}\n\n{contents}"
                ))))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => match on_missing {
                OnMissing::Skip => Ok(None),
                OnMissing::Error => Err(ContextError::SourceMissing {
                    id: id.unwrap_or(path).to_string(),
                    path: resolved.display().to_string(),
                }),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Run a generator subprocess. Failure (spawn, non-zero exit,
    /// timeout) just means the output file will be missing; the source's
    /// `on_missing` policy decides from there. Generator output goes to
    /// the engine log, never into the model context.
    async fn run_generator(&self, generator: &GeneratorSpec) {
        if generator.command.is_empty() {
            tracing::warn!("context generator has an empty command");
            return;
        }
        let mut command = tokio::process::Command::new(&generator.command[0]);
        command
            .args(&generator.command[1..])
            .current_dir(&self.workspace)
            .env("DELTA_RUN_ID", &self.run_id)
            .env("DELTA_AGENT_HOME", &self.agent_home)
            .env("DELTA_CWD", &self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(program = %generator.command[0], error = %e, "context generator failed to spawn");
                return;
            }
        };

        match tokio::time::timeout(
            Duration::from_millis(generator.timeout_ms),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if output.status.success() {
                    tracing::debug!(%stdout, %stderr, "context generator finished");
                } else {
                    tracing::warn!(
                        code = output.status.code().unwrap_or(-1),
                        %stdout,
                        %stderr,
                        "context generator exited non-zero; treating output as missing"
                    );
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "context generator output collection failed");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = generator.timeout_ms,
                    "context generator timed out; treating output as missing"
                );
            }
        }
    }

    /// Expand `${AGENT_HOME}`/`${CWD}` and anchor relative paths at the
    /// workspace (the same directory generators run in).
    fn resolve_path(&self, path: &str) -> PathBuf {
        let expanded = path
            .replace("${AGENT_HOME}", &self.agent_home.display().to_string())
            .replace("${CWD}", &self.workspace.display().to_string());
        let expanded = PathBuf::from(expanded);
        if expanded.is_absolute() {
            expanded
        } else {
            self.workspace.join(expanded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_types::ContextManifest;

    fn builder(manifest: ContextManifest, dir: &Path) -> ContextBuilder {
        ContextBuilder::new(manifest, dir, dir, "run1")
    }

    fn manifest(sources: serde_json::Value) -> ContextManifest {
        serde_json::from_value(serde_json::json!({ "sources": sources })).unwrap()
    }

    #[tokio::test]
    async fn file_source_wraps_contents_in_a_context_block() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.md"), "be brief").unwrap();
        let manifest = manifest(serde_json::json!([
            {"type": "file", "id": "system", "path": "${CWD}/prompt.md"},
            {"type": "journal"}
        ]));
        let messages = builder(manifest, dir.path()).build(&[]).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].content.as_deref(),
            Some("# Context Block: system\n\nbe brief")
        );
    }

    #[tokio::test]
    async fn missing_file_skip_contributes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest(serde_json::json!([
            {"type": "file", "path": "absent.md", "on_missing": "skip"},
            {"type": "journal"}
        ]));
        let messages = builder(manifest, dir.path()).build(&[]).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn missing_file_error_fails_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest(serde_json::json!([
            {"type": "file", "id": "sys", "path": "absent.md"},
            {"type": "journal"}
        ]));
        let err = builder(manifest, dir.path()).build(&[]).await.unwrap_err();
        assert!(matches!(err, ContextError::SourceMissing { .. }));
    }

    #[tokio::test]
    async fn computed_file_runs_generator_then_reads_output() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest(serde_json::json!([
            {"type": "computed_file",
             "id": "facts",
             "generator": {"command": ["sh", "-c", "printf 'generated' > out.md"]},
             "output_path": "${CWD}/out.md"},
            {"type": "journal"}
        ]));
        let messages = builder(manifest, dir.path()).build(&[]).await.unwrap();
        assert_eq!(
            messages[0].content.as_deref(),
            Some("# Context Block: facts\n\ngenerated")
        );
    }

    #[tokio::test]
    async fn failed_generator_is_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest(serde_json::json!([
            {"type": "computed_file",
             "generator": {"command": ["sh", "-c", "exit 1"]},
             "output_path": "never.md",
             "on_missing": "skip"},
            {"type": "journal"}
        ]));
        let messages = builder(manifest, dir.path()).build(&[]).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn generator_sees_delta_env() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest(serde_json::json!([
            {"type": "computed_file",
             "generator": {"command": ["sh", "-c", "printf '%s' \"$DELTA_RUN_ID\" > env.txt"]},
             "output_path": "env.txt"},
            {"type": "journal"}
        ]));
        let messages = builder(manifest, dir.path()).build(&[]).await.unwrap();
        assert!(messages[0].content.as_deref().unwrap().ends_with("run1"));
    }

    #[tokio::test]
    async fn build_is_deterministic_for_identical_inputs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha").unwrap();
        let manifest = manifest(serde_json::json!([
            {"type": "file", "path": "${CWD}/a.md"},
            {"type": "journal"}
        ]));
        let builder = builder(manifest, dir.path());
        let first = builder.build(&[]).await.unwrap();
        let second = builder.build(&[]).await.unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}

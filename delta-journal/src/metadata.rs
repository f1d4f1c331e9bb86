//! The run's mutable metadata file, rewritten atomically on change.

use std::path::PathBuf;

use delta_types::{JournalError, RunMetadata};
use tokio::sync::Mutex;

const METADATA_FILE_NAME: &str = "metadata.json";

/// Read-modify-write access to `metadata.json`.
///
/// Updates go to a tempfile in the same directory and are renamed over
/// the original, so readers never observe a partial write. In-process
/// writers are serialized by a mutex; the janitor keeps other processes
/// away.
pub struct MetadataStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl MetadataStore {
    /// Create a store for the metadata file inside `run_dir`.
    pub fn new(run_dir: &std::path::Path) -> Self {
        Self {
            path: run_dir.join(METADATA_FILE_NAME),
            lock: Mutex::new(()),
        }
    }

    /// Whether the metadata file exists yet.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Write the initial metadata. Fails if metadata already exists —
    /// a run directory is initialized exactly once.
    pub async fn initialize(&self, metadata: &RunMetadata) -> Result<(), JournalError> {
        let _guard = self.lock.lock().await;
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Err(JournalError::AlreadyInitialized(
                self.path.display().to_string(),
            ));
        }
        self.write_atomic(metadata).await
    }

    /// Read the current metadata.
    pub async fn read(&self) -> Result<RunMetadata, JournalError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| JournalError::Metadata(format!("{}: {e}", self.path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| JournalError::Metadata(format!("{}: {e}", self.path.display())))
    }

    /// Apply `patch` under the lock and persist the result atomically.
    pub async fn update<F>(&self, patch: F) -> Result<RunMetadata, JournalError>
    where
        F: FnOnce(&mut RunMetadata),
    {
        let _guard = self.lock.lock().await;
        let mut metadata = self.read().await?;
        patch(&mut metadata);
        self.write_atomic(&metadata).await?;
        Ok(metadata)
    }

    async fn write_atomic(&self, metadata: &RunMetadata) -> Result<(), JournalError> {
        let json = serde_json::to_vec_pretty(metadata)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

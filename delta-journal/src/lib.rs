#![deny(missing_docs)]
//! Append-only journal, atomic metadata, and I/O audit capture.
//!
//! The journal is the single source of truth for a run. One JSON object
//! per line, newline-terminated, no pretty-printing, no arrays — and the
//! file refuses to open when it finds evidence that some external tool
//! rewrote it into either of those shapes.
//!
//! The metadata file is the journal's small mutable companion; every
//! update goes through write-to-tempfile + atomic rename so a partial
//! write is never observable.

mod audit;
mod metadata;

pub use audit::{AuditStore, InvocationMeta, ToolExecutionCapture};
pub use metadata::MetadataStore;

use std::path::{Path, PathBuf};

use delta_types::{JournalError, JournalEvent};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// The only file name a journal may have.
pub const JOURNAL_FILE_NAME: &str = "journal.jsonl";

/// An open, validated journal.
///
/// Owns its file handle; in-process appenders are serialized by an
/// internal mutex. Cross-process appending is not supported — the
/// janitor's liveness check is what prevents it.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
    last_seq_on_open: u64,
}

impl Journal {
    /// Open (or create) the journal at `path`, running format sanity
    /// checks and truncation recovery.
    ///
    /// A trailing partial line (no terminating newline) is discarded and
    /// its offset becomes the append position. Seqs in the surviving
    /// prefix must be strictly increasing from 1 with no gaps.
    pub async fn open(path: &Path) -> Result<Self, JournalError> {
        let path_display = path.display().to_string();
        if path.file_name().and_then(|n| n.to_str()) != Some(JOURNAL_FILE_NAME) {
            return Err(JournalError::FormatViolation {
                path: path_display,
                reason: format!("journal must be named {JOURNAL_FILE_NAME}"),
            });
        }

        let mut last_seq = 0;
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let keep = validate_and_measure(&bytes, &path_display, &mut last_seq)?;
                if keep < bytes.len() {
                    tracing::warn!(
                        path = %path_display,
                        discarded = bytes.len() - keep,
                        "discarding partial trailing journal line"
                    );
                    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
                    file.set_len(keep as u64).await?;
                    file.sync_data().await?;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            last_seq_on_open: last_seq,
        })
    }

    /// The highest seq found when the journal was opened. 0 for a fresh
    /// journal.
    pub fn last_seq_on_open(&self) -> u64 {
        self.last_seq_on_open
    }

    /// Append one event as a compact JSON line, flushed to the OS before
    /// returning.
    pub async fn append(&self, event: &JournalEvent) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read every event currently on disk.
    pub async fn read_all(&self) -> Result<Vec<JournalEvent>, JournalError> {
        let display = self.path.display().to_string();
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        parse_events(&bytes, &display)
    }

    /// Flush and release the file handle.
    pub async fn close(self) -> Result<(), JournalError> {
        let file = self.file.into_inner();
        file.sync_all().await?;
        Ok(())
    }
}

/// Run the open-time sanity checks and return how many bytes of the file
/// form complete, valid lines. Updates `last_seq` with the final seq seen.
fn validate_and_measure(
    bytes: &[u8],
    path: &str,
    last_seq: &mut u64,
) -> Result<usize, JournalError> {
    if let Some(first) = bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        if *first == b'[' {
            return Err(JournalError::FormatViolation {
                path: path.into(),
                reason: "first byte is '[' — the file was rewritten as a JSON array".into(),
            });
        }
    }
    if bytes.first().is_some_and(|b| *b == b' ' || *b == b'\t') {
        return Err(JournalError::FormatViolation {
            path: path.into(),
            reason: "first line is indented — the file was pretty-printed".into(),
        });
    }

    let keep = match bytes.iter().rposition(|b| *b == b'\n') {
        Some(pos) => pos + 1,
        None => 0,
    };

    let events = parse_events(&bytes[..keep], path)?;
    let mut expected = 1;
    for event in &events {
        if event.seq != expected {
            return Err(JournalError::SequenceGap {
                path: path.into(),
                expected,
                found: event.seq,
            });
        }
        expected += 1;
    }
    *last_seq = events.last().map(|e| e.seq).unwrap_or(0);
    Ok(keep)
}

fn parse_events(bytes: &[u8], path: &str) -> Result<Vec<JournalEvent>, JournalError> {
    let mut events = Vec::new();
    for (idx, line) in bytes.split(|b| *b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        let event =
            serde_json::from_slice::<JournalEvent>(line).map_err(|e| JournalError::MalformedLine {
                path: path.into(),
                line: idx + 1,
                reason: e.to_string(),
            })?;
        events.push(event);
    }
    Ok(events)
}

/// Generate an opaque time-ordered token, unique within a run.
///
/// Used for run ids, invocation ids, and execution ids: sortable by
/// creation time, with a uuid suffix against same-millisecond collisions.
pub fn new_token() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{millis}_{}", &suffix[..8])
}

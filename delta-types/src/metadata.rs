//! Run metadata — the small mutable companion to the journal.

use crate::event::RunStatus;
use serde::{Deserialize, Serialize};

/// Contents of `metadata.json`, rewritten atomically on every change.
///
/// The journal records what happened; metadata records where the run
/// stands right now. `pid`/`hostname`/`process_name` exist solely so the
/// janitor can decide whether a RUNNING run is actually alive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// The run this metadata belongs to.
    pub run_id: String,
    /// RFC3339 start time.
    pub start_time: String,
    /// Start time as Unix seconds, for cheap arithmetic.
    pub start_time_unix: i64,
    /// RFC3339 end time, set on terminal transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Reference to the agent definition (its root directory).
    pub agent_ref: String,
    /// The task the run was started with.
    pub task: String,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// Count of completed Act steps.
    pub iterations_completed: u32,
    /// Pid of the owning engine process.
    pub pid: u32,
    /// Hostname of the machine that owns the run.
    pub hostname: String,
    /// Executable name of the owning process, for pid-reuse detection.
    pub process_name: String,
    /// Fatal error message, set when status is FAILED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunMetadata {
        RunMetadata {
            run_id: "20260801120000_ab12cd34".into(),
            start_time: "2026-08-01T12:00:00Z".into(),
            start_time_unix: 1_785_585_600,
            end_time: None,
            agent_ref: "/agents/hello".into(),
            task: "say hi".into(),
            status: RunStatus::Running,
            iterations_completed: 0,
            pid: 4242,
            hostname: "buildbox".into(),
            process_name: "delta".into(),
            error: None,
        }
    }

    #[test]
    fn optional_fields_are_omitted_until_set() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("end_time"));
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"status\":\"RUNNING\""));
    }

    #[test]
    fn roundtrips() {
        let meta = sample();
        let json = serde_json::to_string(&meta).unwrap();
        let back: RunMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}

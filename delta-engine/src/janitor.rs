//! Liveness triage for runs found in status RUNNING.
//!
//! A run left RUNNING means either the owning process is still alive
//! (resume must be refused) or it died without a terminal transition
//! (safe to patch to INTERRUPTED). The evidence is the pid, the process
//! name behind that pid, and the hostname — all recorded in metadata at
//! run start for exactly this moment.

use delta_types::{RunMetadata, RunStatus};
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};

/// What the janitor concluded about an existing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Triage {
    /// Not RUNNING; the status passes through unchanged.
    Clean(RunStatus),
    /// RUNNING but provably dead: safe to patch to INTERRUPTED.
    Orphaned,
    /// Resume must not proceed.
    Refused(String),
}

/// Decide whether a run can be taken over.
///
/// Only RUNNING gets real triage. Cross-host evidence is unusable (pids
/// are per-host), so a hostname mismatch refuses unless `force`. A live
/// pid whose process name differs from the recorded one is pid reuse,
/// not the original run.
pub fn triage(metadata: &RunMetadata, force: bool) -> Triage {
    if metadata.status != RunStatus::Running {
        return Triage::Clean(metadata.status);
    }

    let local_host = System::host_name().unwrap_or_default();
    if metadata.hostname != local_host {
        if force {
            tracing::warn!(
                recorded = %metadata.hostname,
                local = %local_host,
                "cross-host recovery forced"
            );
            return Triage::Orphaned;
        }
        return Triage::Refused(format!(
            "run {} is marked RUNNING on host '{}' (this is '{}'); pass force to recover anyway",
            metadata.run_id, metadata.hostname, local_host
        ));
    }

    let system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    match system.process(Pid::from_u32(metadata.pid)) {
        None => Triage::Orphaned,
        Some(process) if process.name() != metadata.process_name => {
            tracing::info!(
                pid = metadata.pid,
                found = %process.name(),
                recorded = %metadata.process_name,
                "pid was reused by an unrelated process"
            );
            Triage::Orphaned
        }
        Some(_) => Triage::Refused(format!(
            "run {} is still owned by live process {} ({})",
            metadata.run_id, metadata.pid, metadata.process_name
        )),
    }
}

/// The hostname the current process runs on.
pub fn local_hostname() -> String {
    System::host_name().unwrap_or_else(|| "unknown".into())
}

/// The executable name of the current process, as recorded in metadata.
pub fn current_process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "delta".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(status: RunStatus, pid: u32, hostname: String, process_name: String) -> RunMetadata {
        RunMetadata {
            run_id: "r1".into(),
            start_time: "2026-08-01T00:00:00Z".into(),
            start_time_unix: 0,
            end_time: None,
            agent_ref: "/a".into(),
            task: "t".into(),
            status,
            iterations_completed: 0,
            pid,
            hostname,
            process_name,
            error: None,
        }
    }

    #[test]
    fn non_running_passes_through() {
        for status in [
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Interrupted,
            RunStatus::WaitingForInput,
        ] {
            let meta = metadata(status, 1, local_hostname(), "x".into());
            assert_eq!(triage(&meta, false), Triage::Clean(status));
        }
    }

    #[test]
    fn dead_pid_is_orphaned() {
        // Near the pid_max ceiling; vanishingly unlikely to be live.
        let meta = metadata(RunStatus::Running, 4_194_000, local_hostname(), "ghost".into());
        assert_eq!(triage(&meta, false), Triage::Orphaned);
    }

    #[test]
    fn cross_host_refuses_without_force() {
        let meta = metadata(
            RunStatus::Running,
            1,
            "some-other-host".into(),
            "delta".into(),
        );
        assert!(matches!(triage(&meta, false), Triage::Refused(_)));
        assert_eq!(triage(&meta, true), Triage::Orphaned);
    }

    #[test]
    fn live_pid_with_matching_name_refuses() {
        let meta = metadata(
            RunStatus::Running,
            std::process::id(),
            local_hostname(),
            current_process_name(),
        );
        assert!(matches!(triage(&meta, false), Triage::Refused(_)));
    }

    #[test]
    fn live_pid_with_different_name_is_pid_reuse() {
        let meta = metadata(
            RunStatus::Running,
            std::process::id(),
            local_hostname(),
            "definitely-not-this-binary".into(),
        );
        assert_eq!(triage(&meta, false), Triage::Orphaned);
    }
}

//! Orchestrator phase tracking and lifetime statistics.

use mergesync_model::Timestamp;
use serde::Serialize;
use std::fmt;

/// What the orchestrator is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// No operation in progress, nothing has run yet.
    Idle,
    /// Connecting to the master store.
    Connecting,
    /// Pulling master changes into the local store.
    Pulling,
    /// Removing local records the master no longer has.
    DetectingOrphans,
    /// Pushing pending local changes to the master store.
    Pushing,
    /// The last operation completed.
    Synced,
    /// The last operation aborted.
    Error,
}

impl SyncPhase {
    /// Returns true if an operation is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncPhase::Connecting
                | SyncPhase::Pulling
                | SyncPhase::DetectingOrphans
                | SyncPhase::Pushing
        )
    }

    /// Returns true if a new operation may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncPhase::Idle | SyncPhase::Synced | SyncPhase::Error)
    }

    /// Lowercase name used in logs and status reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Connecting => "connecting",
            SyncPhase::Pulling => "pulling",
            SyncPhase::DetectingOrphans => "detecting_orphans",
            SyncPhase::Pushing => "pushing",
            SyncPhase::Synced => "synced",
            SyncPhase::Error => "error",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics accumulated over the orchestrator's lifetime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Full cycles that ran to completion (with or without per-type errors).
    pub cycles_completed: u64,
    /// Records changed locally by pulls.
    pub records_pulled: u64,
    /// Records written to the master store by pushes.
    pub records_pushed: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// Local records removed by the orphan detector.
    pub orphans_removed: u64,
    /// Completion time of the last operation.
    pub last_sync_time: Option<Timestamp>,
    /// Last error message.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_transitions() {
        assert!(SyncPhase::Idle.can_start_sync());
        assert!(SyncPhase::Synced.can_start_sync());
        assert!(SyncPhase::Error.can_start_sync());
        assert!(!SyncPhase::Pulling.can_start_sync());
        assert!(!SyncPhase::DetectingOrphans.can_start_sync());

        assert!(SyncPhase::Pushing.is_active());
        assert!(!SyncPhase::Synced.is_active());
    }

    #[test]
    fn phase_names() {
        assert_eq!(SyncPhase::DetectingOrphans.to_string(), "detecting_orphans");
        assert_eq!(
            serde_json::to_value(SyncPhase::Pulling).unwrap(),
            serde_json::json!("pulling")
        );
    }
}

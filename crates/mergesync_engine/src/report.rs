//! Cycle results and status snapshots.

use crate::driver::{PullReport, PushReport};
use crate::error::SyncError;
use crate::orphan::OrphanReport;
use crate::state::SyncPhase;
use mergesync_model::{ConflictOutcome, ConflictPolicy, Timestamp};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// The step of a cycle an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// Sync-column migration and `uuid` backfill.
    Schema,
    /// Pull.
    Pull,
    /// Orphan detection.
    Orphans,
    /// Push.
    Push,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStage::Schema => "schema",
            SyncStage::Pull => "pull",
            SyncStage::Orphans => "orphans",
            SyncStage::Push => "push",
        })
    }
}

/// A failure confined to one entity type.
#[derive(Debug, Clone, Serialize)]
pub struct EntityError {
    /// Entity type.
    pub entity: String,
    /// Step that failed.
    pub stage: SyncStage,
    /// Error message.
    pub message: String,
}

/// Summary of one orchestrator operation.
#[derive(Debug, Clone, Serialize)]
pub struct SyncCycleResult {
    /// Device that ran the cycle.
    pub device_id: String,
    /// Records changed locally by pulls.
    pub total_pulled: usize,
    /// Upserts and deletes that reached the master store.
    pub total_pushed: usize,
    /// Local orphans removed.
    pub total_orphans_removed: usize,
    /// Records that failed and were skipped.
    pub total_failed: usize,
    /// Conflicts resolved.
    pub total_conflicts: usize,
    /// Every conflict resolved during the cycle.
    pub conflicts: Vec<ConflictOutcome>,
    /// Per-type failures.
    pub errors: Vec<EntityError>,
    /// Per-type pull counts, in processing order.
    pub pulls: Vec<(String, PullReport)>,
    /// Per-type push counts, in processing order.
    pub pushes: Vec<(String, PushReport)>,
    /// Per-type orphan counts, in processing order.
    pub orphans: Vec<(String, OrphanReport)>,
    /// True if no entity type failed.
    pub success: bool,
    /// Wall time of the operation.
    pub duration: Duration,
}

impl SyncCycleResult {
    pub(crate) fn new(device_id: String) -> Self {
        Self {
            device_id,
            total_pulled: 0,
            total_pushed: 0,
            total_orphans_removed: 0,
            total_failed: 0,
            total_conflicts: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            pulls: Vec::new(),
            pushes: Vec::new(),
            orphans: Vec::new(),
            success: false,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn add_pull(&mut self, entity: &str, mut report: PullReport) {
        self.total_pulled += report.pulled();
        self.total_failed += report.failed;
        self.conflicts.append(&mut report.conflicts);
        self.pulls.push((entity.to_string(), report));
    }

    pub(crate) fn add_push(&mut self, entity: &str, report: PushReport) {
        self.total_pushed += report.total();
        self.total_failed += report.failed;
        self.pushes.push((entity.to_string(), report));
    }

    pub(crate) fn add_orphans(&mut self, entity: &str, report: OrphanReport) {
        self.total_orphans_removed += report.removed;
        self.total_failed += report.failed;
        self.orphans.push((entity.to_string(), report));
    }

    pub(crate) fn add_error(&mut self, entity: &str, stage: SyncStage, error: &SyncError) {
        self.errors.push(EntityError {
            entity: entity.to_string(),
            stage,
            message: error.to_string(),
        });
    }

    pub(crate) fn finish(&mut self, duration: Duration) {
        self.total_conflicts = self.conflicts.len();
        self.success = self.errors.is_empty();
        self.duration = duration;
    }
}

/// Sync health of one entity type.
#[derive(Debug, Clone, Serialize)]
pub struct EntityStatus {
    /// Entity type.
    pub entity: String,
    /// Local rows, tombstones included.
    pub local_total: usize,
    /// Local rows that are not tombstones.
    pub local_active: usize,
    /// Local rows waiting to be pushed.
    pub unsynced: usize,
    /// Active master documents, if the master was reachable.
    pub remote_active: Option<usize>,
    /// Last successful pull.
    pub last_sync: Option<Timestamp>,
    /// First error met while gathering these numbers.
    pub error: Option<String>,
}

/// A point-in-time view of the engine, for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// This device's id.
    pub device_id: String,
    /// Whether the master store answered.
    pub connected: bool,
    /// Connected, every type readable, and the last operation did not abort.
    pub healthy: bool,
    /// Current orchestrator phase.
    pub phase: SyncPhase,
    /// Conflict policy in force.
    pub conflict_policy: ConflictPolicy,
    /// Per-type figures, in dependency order.
    pub entities: Vec<EntityStatus>,
    /// Last operation error, if the last operation aborted.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_no_entity_errors() {
        let mut result = SyncCycleResult::new("d".into());
        result.add_push(
            "customers",
            PushReport {
                pushed: 2,
                deleted: 1,
                purged: 1,
                failed: 1,
            },
        );
        result.finish(Duration::from_millis(3));
        assert!(result.success);
        assert_eq!(result.total_pushed, 3);
        assert_eq!(result.total_failed, 1);

        result.add_error("sessions", SyncStage::Pull, &SyncError::DeadlineExceeded);
        result.finish(Duration::from_millis(4));
        assert!(!result.success);
        assert_eq!(result.errors[0].message, "sync cycle deadline exceeded");
    }

    #[test]
    fn serializes_for_status_endpoints() {
        let result = SyncCycleResult::new("d".into());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["device_id"], "d");
        assert_eq!(value["success"], false);
    }
}

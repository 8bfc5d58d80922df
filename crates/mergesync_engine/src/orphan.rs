//! Removal of local records the master no longer holds.

use crate::cascade::cascade_delete;
use crate::context::CycleContext;
use crate::error::{SyncError, SyncResult};
use mergesync_model::{EntityDescriptor, LocalPredicate, MasterFilter, RecordId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Counts from one entity type's orphan pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OrphanReport {
    /// Synced, active local records examined.
    pub checked: usize,
    /// Orphans removed (cascade children not included).
    pub removed: usize,
    /// Cascade children removed along with the orphans.
    pub cascaded: usize,
    /// Orphans that could not be removed.
    pub failed: usize,
    /// True if the type was skipped because the master holds more active
    /// records than one batch.
    pub skipped: bool,
}

/// Cascade-deletes every synced, active local record of one type whose
/// active master counterpart (matched by `uuid`, or by id) is gone.
///
/// Records with unpushed changes are never treated as orphans, so a local
/// creation the master has not seen yet survives until it is pushed.
pub fn detect_orphans(
    ctx: &CycleContext<'_>,
    descriptor: &EntityDescriptor,
) -> SyncResult<OrphanReport> {
    let mut report = OrphanReport::default();
    let limit = ctx.config.reconcile_batch_size;

    let remote_active = ctx
        .master
        .count(&descriptor.remote_collection, &MasterFilter::active())?;
    if remote_active > limit {
        warn!(
            entity = %descriptor.name,
            remote_active,
            limit,
            "too many master records for orphan detection, skipping"
        );
        report.skipped = true;
        return Ok(report);
    }

    let active = ctx
        .master
        .find(&descriptor.remote_collection, &MasterFilter::active())?;
    let uuids: HashSet<String> = active
        .iter()
        .filter_map(|d| d.uuid().map(str::to_string))
        .collect();
    let ids: HashMap<RecordId, Option<String>> = active
        .into_iter()
        .map(|d| {
            let uuid = d.uuid().map(str::to_string);
            (d.id, uuid)
        })
        .collect();

    let candidates = ctx
        .local
        .scan(&descriptor.local_table, &LocalPredicate::Active)?;
    for local in candidates.iter().filter(|r| r.is_synced()) {
        ctx.check_deadline()?;
        report.checked += 1;

        // a uuid-bearing row matches by id only a document without a uuid
        let present = match local.uuid() {
            Some(u) if uuids.contains(u) => true,
            Some(_) => matches!(ids.get(&local.id), Some(None)),
            None => ids.contains_key(&local.id),
        };
        if present {
            continue;
        }

        match cascade_delete(ctx.local, ctx.registry, &descriptor.name, &local.id) {
            Ok(cascade) => {
                warn!(entity = %descriptor.name, id = %local.id, uuid = ?local.uuid(), "removed orphan");
                report.removed += 1;
                report.cascaded += cascade.deleted.saturating_sub(1);
            }
            Err(e @ SyncError::Model(_)) => return Err(e),
            Err(e) => {
                warn!(entity = %descriptor.name, id = %local.id, error = %e, "could not remove orphan");
                report.failed += 1;
            }
        }
    }

    info!(
        entity = %descriptor.name,
        checked = report.checked,
        removed = report.removed,
        "orphan detection complete"
    );
    Ok(report)
}

//! Per-entity pull and push.

use crate::cascade::cascade_delete;
use crate::context::CycleContext;
use crate::error::SyncResult;
use crate::identity::IdentityResolver;
use crate::watermark::SyncStateStore;
use mergesync_model::fields;
use mergesync_model::{
    resolve_conflict, ConflictOutcome, EntityDescriptor, LocalPredicate, MasterFilter, Record,
    RecordId, Winner,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Counts from one entity type's pull.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PullReport {
    /// Master records fetched by the delta (or bootstrap) query.
    pub fetched: usize,
    /// Records inserted locally.
    pub inserted: usize,
    /// Local records overwritten with master content.
    pub updated: usize,
    /// Local records removed because the master tombstoned them.
    pub deleted: usize,
    /// Records re-imported by the reconciliation pass.
    pub reimported: usize,
    /// Master records already reflected locally.
    pub unchanged: usize,
    /// Consumed tombstones physically removed on both sides' agreement.
    pub tombstones_purged: usize,
    /// Conflicts won by the local copy and written straight back to master.
    pub written_back: usize,
    /// Records left for the next pull because the row changed underneath.
    pub deferred: usize,
    /// Records that failed and were skipped.
    pub failed: usize,
    /// Conflicts resolved during this pull.
    pub conflicts: Vec<ConflictOutcome>,
    /// Whether the watermark moved.
    pub watermark_advanced: bool,
}

impl PullReport {
    /// Records changed locally.
    pub fn pulled(&self) -> usize {
        self.inserted + self.updated + self.deleted + self.reimported
    }
}

/// Counts from one entity type's push.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PushReport {
    /// Records upserted to master.
    pub pushed: usize,
    /// Tombstones propagated to master.
    pub deleted: usize,
    /// Local tombstones removed because the master never had the record.
    pub purged: usize,
    /// Records that failed and stay pending.
    pub failed: usize,
}

impl PushReport {
    /// Writes that reached the master store.
    pub fn total(&self) -> usize {
        self.pushed + self.deleted
    }
}

/// What happened to one pending record on push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushOutcome {
    Upserted,
    Deleted,
    Purged,
}

/// Runs the pull and push algorithms for one entity type.
pub struct EntityDriver<'c, 'a> {
    ctx: &'c CycleContext<'a>,
    descriptor: &'c EntityDescriptor,
    resolver: IdentityResolver,
    columns: Option<Option<Vec<String>>>,
}

impl<'c, 'a> EntityDriver<'c, 'a> {
    /// Creates a driver for one entity type.
    pub fn new(ctx: &'c CycleContext<'a>, descriptor: &'c EntityDescriptor) -> Self {
        Self {
            ctx,
            descriptor,
            resolver: IdentityResolver::new(),
            columns: None,
        }
    }

    fn entity(&self) -> &str {
        &self.descriptor.name
    }

    fn table(&self) -> &str {
        &self.descriptor.local_table
    }

    fn collection(&self) -> &str {
        &self.descriptor.remote_collection
    }

    /// Brings master changes into the local store.
    ///
    /// Fetches master records changed since the watermark (only active ones
    /// when the type was never synced) and applies each one. When a watermark
    /// existed, a reconciliation pass then re-imports active master records
    /// whose local counterpart is missing or a stale tombstone. The watermark
    /// advances to the scan start time only if no record failed.
    pub fn pull(&mut self) -> SyncResult<PullReport> {
        let state = SyncStateStore::new(self.ctx.meta);
        let last_sync = state.get_last_sync_time(self.entity())?;
        let scan_started = self.ctx.clock.now();

        let filter = match last_sync {
            Some(watermark) => MasterFilter::changed_since(watermark),
            None => MasterFilter::active(),
        };
        let docs = self.ctx.master.find(self.collection(), &filter)?;

        let mut report = PullReport {
            fetched: docs.len(),
            ..PullReport::default()
        };
        info!(
            entity = %self.entity(),
            fetched = docs.len(),
            bootstrap = last_sync.is_none(),
            "pulling"
        );

        for doc in &docs {
            self.ctx.check_deadline()?;
            match self.apply_incoming(doc, &mut report) {
                Ok(()) => {}
                Err(e) if e.aborts_entity() => return Err(e),
                Err(e) => {
                    warn!(entity = %self.entity(), id = %doc.id, error = %e, "skipping incoming record");
                    report.failed += 1;
                }
            }
        }

        if last_sync.is_some() {
            let seen: HashSet<RecordId> = docs.iter().map(|d| d.id.clone()).collect();
            self.reconcile(&seen, &mut report)?;
        }

        if report.failed == 0 && report.deferred == 0 {
            report.watermark_advanced = state.advance(self.entity(), scan_started)?;
        } else {
            warn!(
                entity = %self.entity(),
                failed = report.failed,
                deferred = report.deferred,
                "watermark held back"
            );
        }

        info!(
            entity = %self.entity(),
            pulled = report.pulled(),
            unchanged = report.unchanged,
            conflicts = report.conflicts.len(),
            failed = report.failed,
            "pull complete"
        );
        Ok(report)
    }

    /// Sends pending local changes to the master store.
    ///
    /// A failing record is logged, counted and left pending; the rest of the
    /// batch continues.
    pub fn push(&mut self) -> SyncResult<PushReport> {
        let pending = self.ctx.local.scan(self.table(), &LocalPredicate::PendingPush)?;
        let mut report = PushReport::default();
        info!(entity = %self.entity(), pending = pending.len(), "pushing");

        for local in &pending {
            self.ctx.check_deadline()?;
            match self.push_one(local) {
                Ok(PushOutcome::Upserted) => report.pushed += 1,
                Ok(PushOutcome::Deleted) => report.deleted += 1,
                Ok(PushOutcome::Purged) => report.purged += 1,
                Err(e) if e.aborts_entity() => return Err(e),
                Err(e) => {
                    warn!(entity = %self.entity(), id = %local.id, error = %e, "push failed, record stays pending");
                    report.failed += 1;
                }
            }
        }

        info!(
            entity = %self.entity(),
            pushed = report.pushed,
            deleted = report.deleted,
            failed = report.failed,
            "push complete"
        );
        Ok(report)
    }

    fn apply_incoming(&mut self, doc: &Record, report: &mut PullReport) -> SyncResult<()> {
        let mut incoming = doc.clone();
        self.resolver
            .resolve_incoming(self.ctx, self.descriptor, &mut incoming)?;
        let local = self.find_counterpart(&incoming)?;

        match (incoming.is_deleted(), local) {
            (true, None) => report.unchanged += 1,

            (true, Some(local)) if local.is_deleted() && local.is_synced() => {
                self.purge(&local)?;
                report.tombstones_purged += 1;
            }

            (true, Some(local)) if local.is_synced() => {
                self.delete_local(&local)?;
                report.deleted += 1;
            }

            (true, Some(local)) if local.is_deleted() => {
                // both sides deleted it
                self.purge(&local)?;
                report.tombstones_purged += 1;
            }

            (true, Some(local)) => {
                let decision = resolve_conflict(self.ctx.policy, &local, &incoming);
                report
                    .conflicts
                    .push(ConflictOutcome::new(self.entity(), &local, &incoming, decision));
                debug!(entity = %self.entity(), id = %local.id, reason = %decision.reason, "tombstone conflict");
                match decision.winner {
                    Winner::Master => {
                        self.delete_local(&local)?;
                        report.deleted += 1;
                    }
                    Winner::Local => {
                        if self.write_back(&local)? {
                            report.written_back += 1;
                        }
                    }
                }
            }

            (false, None) => {
                let id = self.insert_local(&incoming)?;
                debug!(entity = %self.entity(), id = %id, "inserted");
                report.inserted += 1;
            }

            (false, Some(local)) if local.is_synced() => {
                if is_echo(&local, &incoming) {
                    report.unchanged += 1;
                } else if self.overwrite(&local, &incoming)? {
                    report.updated += 1;
                } else {
                    report.deferred += 1;
                }
            }

            (false, Some(local)) if incoming.device_id() == Some(self.ctx.device_id.as_str()) => {
                // our own earlier push; the pending edit is newer and goes out on push
                debug!(entity = %self.entity(), id = %local.id, "own write, local edit pending");
                report.unchanged += 1;
            }

            (false, Some(local)) => {
                let decision = resolve_conflict(self.ctx.policy, &local, &incoming);
                report
                    .conflicts
                    .push(ConflictOutcome::new(self.entity(), &local, &incoming, decision));
                debug!(entity = %self.entity(), id = %local.id, reason = %decision.reason, "conflict");
                match decision.winner {
                    Winner::Master => {
                        if self.overwrite(&local, &incoming)? {
                            report.updated += 1;
                        } else {
                            report.deferred += 1;
                        }
                    }
                    Winner::Local => {
                        if self.write_back(&local)? {
                            report.written_back += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-imports active master records whose local copy is missing or a
    /// tombstone older than the master record.
    fn reconcile(&mut self, seen: &HashSet<RecordId>, report: &mut PullReport) -> SyncResult<()> {
        let limit = self.ctx.config.reconcile_batch_size;
        let active = self
            .ctx
            .master
            .find(self.collection(), &MasterFilter::active().with_limit(limit))?;
        if active.len() >= limit {
            warn!(entity = %self.entity(), limit, "reconciliation truncated at batch size");
        }

        for doc in active.iter().filter(|d| !seen.contains(&d.id)) {
            self.ctx.check_deadline()?;
            match self.reconcile_one(doc, report) {
                Ok(()) => {}
                Err(e) if e.aborts_entity() => return Err(e),
                Err(e) => {
                    warn!(entity = %self.entity(), id = %doc.id, error = %e, "skipping reconciliation");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    fn reconcile_one(&mut self, doc: &Record, report: &mut PullReport) -> SyncResult<()> {
        let mut incoming = doc.clone();
        let unresolved = self
            .resolver
            .resolve_incoming(self.ctx, self.descriptor, &mut incoming)?;

        match self.find_counterpart(&incoming)? {
            None if unresolved > 0 => {
                debug!(entity = %self.entity(), id = %doc.id, "referenced parent missing locally, not re-importing");
            }
            None => {
                let id = self.insert_local(&incoming)?;
                info!(entity = %self.entity(), id = %id, "re-imported missing record");
                report.reimported += 1;
            }
            Some(local) if local.is_deleted() && incoming.last_modified() > local.last_modified() => {
                if !local.is_synced() {
                    let decision = resolve_conflict(self.ctx.policy, &local, &incoming);
                    report
                        .conflicts
                        .push(ConflictOutcome::new(self.entity(), &local, &incoming, decision));
                }
                if self.overwrite(&local, &incoming)? {
                    info!(entity = %self.entity(), id = %local.id, "re-imported over stale tombstone");
                    report.reimported += 1;
                } else {
                    report.deferred += 1;
                }
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Pushes one pending record.
    fn push_one(&mut self, local: &Record) -> SyncResult<PushOutcome> {
        let mut outgoing = local.clone();
        self.resolver
            .resolve_outgoing(self.ctx, self.descriptor, &mut outgoing)?;
        let target = self.master_target(&outgoing)?;
        let expected = local.get(fields::UPDATED_AT).cloned().unwrap_or(Value::Null);

        if local.is_deleted() {
            let Some(target) = target else {
                self.purge(local)?;
                debug!(entity = %self.entity(), id = %local.id, "purged tombstone unknown to master");
                return Ok(PushOutcome::Purged);
            };
            self.ctx.master.delete(self.collection(), &target.id)?;
            if !self
                .ctx
                .local
                .mark_synced(self.table(), &local.id, &expected, None)?
            {
                debug!(entity = %self.entity(), id = %local.id, "changed during push, stays pending");
            }
            return Ok(PushOutcome::Deleted);
        }

        let stamp = self.ctx.clock.now();
        outgoing.remove(fields::SYNCED);
        outgoing.set(fields::DEVICE_ID, self.ctx.device_id.as_str());
        outgoing.set(fields::DELETED, 0);
        outgoing.set_updated_at(stamp);
        match target {
            Some(target) => {
                outgoing.id = target.id;
                self.ctx.master.upsert(self.collection(), &outgoing)?;
            }
            None => {
                let id = self.ctx.master.insert(self.collection(), &outgoing)?;
                if id != local.id {
                    info!(entity = %self.entity(), local_id = %local.id, master_id = %id, "id taken on master, stored under a new id");
                }
            }
        }

        let stamp_value = stamp.to_value();
        if !self
            .ctx
            .local
            .mark_synced(self.table(), &local.id, &expected, Some(&stamp_value))?
        {
            debug!(entity = %self.entity(), id = %local.id, "changed during push, stays pending");
        }
        Ok(PushOutcome::Upserted)
    }

    /// Writes a local conflict winner to master at once. On failure the
    /// record stays pending and the push phase retries it.
    ///
    /// When the master side is a tombstone this resurrects it: the document
    /// is rewritten active with the local content and a fresh stamp, and
    /// other devices re-import it on their next pull.
    fn write_back(&mut self, local: &Record) -> SyncResult<bool> {
        match self.push_one(local) {
            Ok(_) => Ok(true),
            Err(e) if e.aborts_entity() => Err(e),
            Err(e) => {
                warn!(entity = %self.entity(), id = %local.id, error = %e, "write-back failed, record stays pending");
                Ok(false)
            }
        }
    }

    /// Finds the local copy of a master record: by `uuid`, then by id. A
    /// local row holding the id under a different `uuid` is another record,
    /// so there is no counterpart.
    fn find_counterpart(&self, incoming: &Record) -> SyncResult<Option<Record>> {
        if let Some(uuid) = incoming.uuid() {
            let by_uuid = self
                .ctx
                .local
                .scan(self.table(), &LocalPredicate::Uuid(uuid.to_string()))?;
            if let Some(found) = by_uuid.into_iter().next() {
                return Ok(Some(found));
            }
        }

        match self.ctx.local.get(self.table(), &incoming.id)? {
            Some(existing) if other_record(&existing, incoming) => {
                debug!(entity = %self.entity(), id = %incoming.id, "id held locally by another record");
                Ok(None)
            }
            found => Ok(found),
        }
    }

    /// Finds the master document a local record should be written to: the
    /// one sharing its `uuid`, else the one with its id unless that document
    /// carries a different `uuid`.
    fn master_target(&self, outgoing: &Record) -> SyncResult<Option<Record>> {
        if let Some(uuid) = outgoing.uuid() {
            if let Some(doc) = self
                .ctx
                .master
                .find_one(self.collection(), MasterFilter::by_uuid(uuid))?
            {
                return Ok(Some(doc));
            }
        }

        match self
            .ctx
            .master
            .find_one(self.collection(), MasterFilter::by_id(outgoing.id.clone()))?
        {
            Some(doc) if other_record(&doc, outgoing) => Ok(None),
            found => Ok(found),
        }
    }

    /// Replaces a local row with master content, unless the row changed
    /// since it was read.
    fn overwrite(&mut self, local: &Record, incoming: &Record) -> SyncResult<bool> {
        let row = self.to_local(incoming, local.id.clone())?;
        let expected = local.get(fields::UPDATED_AT).cloned().unwrap_or(Value::Null);
        let replaced = self
            .ctx
            .local
            .replace_if_unchanged(self.table(), &row, &expected)?;
        if replaced {
            debug!(entity = %self.entity(), id = %local.id, "overwritten from master");
        } else {
            debug!(entity = %self.entity(), id = %local.id, "changed locally during pull, deferred");
        }
        Ok(replaced)
    }

    /// Inserts a master record as a new local row, under its master id when
    /// that is free locally. Returns the local id.
    fn insert_local(&mut self, incoming: &Record) -> SyncResult<RecordId> {
        let row = self.to_local(incoming, incoming.id.clone())?;
        let id = self.ctx.local.insert(self.table(), &row)?;
        if id != incoming.id {
            info!(entity = %self.entity(), master_id = %incoming.id, local_id = %id, "id taken locally, stored under a new id");
        }
        Ok(id)
    }

    fn delete_local(&self, local: &Record) -> SyncResult<()> {
        let report = cascade_delete(self.ctx.local, self.ctx.registry, self.entity(), &local.id)?;
        debug!(entity = %self.entity(), id = %local.id, removed = report.deleted, "deleted from master tombstone");
        Ok(())
    }

    fn purge(&self, local: &Record) -> SyncResult<()> {
        cascade_delete(self.ctx.local, self.ctx.registry, self.entity(), &local.id)?;
        Ok(())
    }

    /// Builds the local row for a master record under a given local id,
    /// keeping only writable columns and marking it synced.
    fn to_local(&mut self, incoming: &Record, id: RecordId) -> SyncResult<Record> {
        if self.columns.is_none() {
            self.columns = Some(self.ctx.local.columns(self.table())?);
        }
        let columns = self.columns.as_ref().and_then(|c| c.as_ref());
        let writable = |field: &str| columns.map_or(true, |c| c.iter().any(|col| col == field));

        let mut row = Record::new(id);
        for (field, value) in &incoming.fields {
            if writable(field) {
                row.set(field, value.clone());
            }
        }
        if writable(fields::DELETED) {
            row.set_deleted(incoming.is_deleted());
        }
        if writable(fields::SYNCED) {
            row.set_synced(true);
        }
        Ok(row)
    }
}

/// True if two records with the same id carry different `uuid`s.
fn other_record(a: &Record, b: &Record) -> bool {
    matches!((a.uuid(), b.uuid()), (Some(x), Some(y)) if x != y)
}

/// True if a synced local row already reflects a master record, which is
/// what a device sees when it pulls back its own push.
fn is_echo(local: &Record, incoming: &Record) -> bool {
    local.is_deleted() == incoming.is_deleted()
        && local.updated_at().is_some()
        && local.updated_at() == incoming.updated_at()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::testing::Harness;
    use mergesync_model::{ConflictPolicy, ConflictReason, Timestamp};
    use mergesync_testkit::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn pull(h: &Harness, entity: &str) -> SyncResult<PullReport> {
        let ctx = h.ctx();
        let descriptor = h.registry.require(entity)?;
        EntityDriver::new(&ctx, descriptor).pull()
    }

    fn push(h: &Harness, entity: &str) -> SyncResult<PushReport> {
        let ctx = h.ctx();
        let descriptor = h.registry.require(entity)?;
        EntityDriver::new(&ctx, descriptor).push()
    }

    fn set_watermark(h: &Harness, entity: &str, at: Timestamp) {
        SyncStateStore::new(&h.local)
            .set_last_sync_time(entity, at)
            .unwrap();
    }

    #[test]
    fn bootstrap_imports_only_active_records() {
        let h = Harness::crm();
        h.master
            .seed("customers", customer(101, "c1", "Ada").stamped(h.clock.tick()));
        h.master.seed(
            "customers",
            customer(102, "c2", "Bob").stamped(h.clock.tick()).tombstoned(),
        );

        let report = pull(&h, "customers").unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.inserted, 1);
        assert!(report.watermark_advanced);

        let row = h.local.row("customers", &RecordId::Int(101)).unwrap();
        assert!(row.is_synced());
        assert_eq!(row.get("name"), Some(&json!("Ada")));
        assert!(h.local.row("customers", &RecordId::Int(102)).is_none());
    }

    #[test]
    fn master_tombstone_cascades_locally() {
        let h = Harness::crm();
        let t0 = h.clock.tick();
        h.local
            .app_put("customers", customer(1, "c1", "Ada").stamped(t0).synced());
        h.local
            .app_put("sessions", session("s1", "su1", 1).stamped(t0).synced());
        h.local
            .app_put("notes", note(10, "n1", "s1", "hi").stamped(t0).synced());
        h.master.seed("customers", customer(1, "c1", "Ada").stamped(t0));
        set_watermark(&h, "customers", t0);

        h.master.tombstone("customers", &RecordId::Int(1));
        let report = pull(&h, "customers").unwrap();

        assert_eq!(report.deleted, 1);
        assert!(h.local.rows("customers").is_empty());
        assert!(h.local.rows("sessions").is_empty());
        assert!(h.local.rows("notes").is_empty());
    }

    #[test]
    fn newer_master_wins_conflict() {
        let h = Harness::crm();
        let t1 = h.clock.tick();
        let t2 = h.clock.tick();
        h.local
            .app_put("customers", customer(1, "c1", "Local").stamped(t1));
        h.master
            .seed("customers", customer(1, "c1", "Master").stamped(t2));

        let report = pull(&h, "customers").unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].winner, Winner::Master);
        assert_eq!(report.conflicts[0].reason, ConflictReason::MasterNewer);

        let row = h.local.row("customers", &RecordId::Int(1)).unwrap();
        assert_eq!(row.get("name"), Some(&json!("Master")));
        assert!(row.is_synced());
    }

    #[test]
    fn newer_local_wins_and_is_written_back() {
        let h = Harness::crm();
        let t1 = h.clock.tick();
        let t2 = h.clock.tick();
        h.local
            .app_put("customers", customer(1, "c1", "Local").stamped(t2));
        h.master
            .seed("customers", customer(1, "c1", "Master").stamped(t1));

        let report = pull(&h, "customers").unwrap();
        assert_eq!(report.written_back, 1);
        assert_eq!(report.conflicts[0].winner, Winner::Local);

        let row = h.local.row("customers", &RecordId::Int(1)).unwrap();
        let doc = h.master.get("customers", &RecordId::Int(1)).unwrap();
        assert!(row.is_synced());
        assert_eq!(row.get("name"), Some(&json!("Local")));
        assert_eq!(doc.get("name"), Some(&json!("Local")));
        assert_eq!(doc.device_id(), Some("device-a"));
        assert_eq!(row.updated_at(), doc.updated_at());
    }

    #[test]
    fn own_pushes_do_not_conflict_with_later_edits() {
        let h = Harness::crm();
        h.local
            .app_put("customers", customer(1, "c1", "Ada").stamped(h.clock.tick()));
        push(&h, "customers").unwrap();
        h.local.app_update("customers", &RecordId::Int(1), |r| {
            r.set("name", "Ada L.");
            r.set_synced(false);
        });

        let report = pull(&h, "customers").unwrap();
        assert!(report.conflicts.is_empty());
        assert_eq!(report.unchanged, 1);
        assert_eq!(
            h.local.row("customers", &RecordId::Int(1)).unwrap().get("name"),
            Some(&json!("Ada L."))
        );
    }

    #[test]
    fn local_wins_policy_resurrects_master_tombstone() {
        let mut h = Harness::crm();
        h.config.conflict_policy = ConflictPolicy::LocalWins;
        let t0 = h.clock.tick();
        h.master.seed("customers", customer(1, "c1", "Ada").stamped(t0));
        set_watermark(&h, "customers", t0);
        h.master.tombstone("customers", &RecordId::Int(1));
        h.local
            .app_put("customers", customer(1, "c1", "Edited").stamped(h.clock.tick()));

        let report = pull(&h, "customers").unwrap();
        assert_eq!(report.conflicts[0].reason, ConflictReason::PolicyLocalWins);
        assert_eq!(report.written_back, 1);

        let doc = h.master.get("customers", &RecordId::Int(1)).unwrap();
        assert!(!doc.is_deleted());
        assert_eq!(doc.get("name"), Some(&json!("Edited")));
    }

    #[test]
    fn pushed_records_echo_back_unchanged() {
        let h = Harness::crm();
        h.local
            .app_put("customers", customer(1, "c1", "Ada").stamped(h.clock.tick()));

        let pushed = push(&h, "customers").unwrap();
        assert_eq!(pushed.pushed, 1);

        let doc = h.master.get("customers", &RecordId::Int(1)).unwrap();
        let row = h.local.row("customers", &RecordId::Int(1)).unwrap();
        assert_eq!(doc.get("synced"), None);
        assert_eq!(doc.device_id(), Some("device-a"));
        assert!(row.is_synced());
        assert_eq!(row.updated_at(), doc.updated_at());

        let pulled = pull(&h, "customers").unwrap();
        assert_eq!(pulled.fetched, 1);
        assert_eq!(pulled.unchanged, 1);
        assert_eq!(pulled.pulled(), 0);
    }

    #[test]
    fn push_translates_references_to_master_ids() {
        let h = Harness::crm();
        h.local
            .app_put("customers", customer(7, "c1", "Ada").synced());
        h.master.seed("customers", customer(101, "c1", "Ada"));
        h.local
            .app_put("sessions", session("s1", "su1", 7).stamped(h.clock.tick()));

        assert_eq!(push(&h, "sessions").unwrap().pushed, 1);
        let doc = h
            .master
            .get("customer_sessions", &RecordId::from("s1"))
            .unwrap();
        assert_eq!(doc.get("customer_id"), Some(&json!(101)));
    }

    #[test]
    fn failing_record_stays_pending() {
        let h = Harness::crm();
        h.local.app_put("customers", customer(1, "c1", "Ada"));
        h.local.app_put("customers", customer(2, "c2", "Bob"));
        h.master.update_faults(|f| {
            f.failing_writes.insert(RecordId::Int(1));
        });

        let report = push(&h, "customers").unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.failed, 1);
        assert!(!h.local.row("customers", &RecordId::Int(1)).unwrap().is_synced());
        assert!(h.local.row("customers", &RecordId::Int(2)).unwrap().is_synced());
    }

    #[test]
    fn tombstones_reach_master_then_get_consumed() {
        let h = Harness::crm();
        let t0 = h.clock.tick();
        h.master.seed("customers", customer(1, "c1", "Ada").stamped(t0));
        h.local
            .app_put("customers", customer(1, "c1", "Ada").stamped(t0).synced());
        h.local
            .app_put("customers", customer(3, "c3", "Never pushed").tombstoned());
        h.local.app_update("customers", &RecordId::Int(1), |r| {
            r.set_deleted(true);
            r.set_synced(false);
        });
        set_watermark(&h, "customers", t0);

        let report = push(&h, "customers").unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.purged, 1);
        assert!(h.master.get("customers", &RecordId::Int(1)).unwrap().is_deleted());
        assert!(h.local.row("customers", &RecordId::Int(1)).unwrap().is_synced());
        assert!(h.local.row("customers", &RecordId::Int(3)).is_none());

        let pulled = pull(&h, "customers").unwrap();
        assert_eq!(pulled.tombstones_purged, 1);
        assert_eq!(pulled.pulled(), 0);
        assert!(h.local.rows("customers").is_empty());
    }

    #[test]
    fn id_taken_locally_by_another_record_gets_a_new_id() {
        let h = Harness::crm();
        h.local
            .app_put("customers", customer(5, "other", "Zed").synced());
        h.master.seed("customers", customer(5, "c5", "Eve"));

        let report = pull(&h, "customers").unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(report.inserted, 1);
        assert!(report.watermark_advanced);
        assert_eq!(
            h.local
                .row("customers", &RecordId::Int(5))
                .unwrap()
                .get("name"),
            Some(&json!("Zed"))
        );
        let moved = h.local.row("customers", &RecordId::Int(6)).unwrap();
        assert_eq!(moved.uuid(), Some("c5"));
        assert!(moved.is_synced());

        let again = pull(&h, "customers").unwrap();
        assert_eq!(again.pulled(), 0);
        assert_eq!(h.local.rows("customers").len(), 2);
    }

    #[test]
    fn id_taken_on_master_by_another_record_gets_a_new_id() {
        let h = Harness::crm();
        h.master
            .seed("customers", customer(1, "theirs", "Bob").stamped(h.clock.tick()));
        h.local
            .app_put("customers", customer(1, "mine", "Ada").stamped(h.clock.tick()));

        let report = push(&h, "customers").unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.failed, 0);

        let theirs = h.master.get("customers", &RecordId::Int(1)).unwrap();
        assert_eq!(theirs.get("name"), Some(&json!("Bob")));
        let mine = h.master.get_by_uuid("customers", "mine").unwrap();
        assert_eq!(mine.id, RecordId::Int(2));
        assert!(h.local.row("customers", &RecordId::Int(1)).unwrap().is_synced());
    }

    #[test]
    fn newer_master_tombstone_beats_pending_edit() {
        let h = Harness::crm();
        let t0 = h.clock.tick();
        h.master.seed("customers", customer(1, "c1", "Ada").stamped(t0));
        set_watermark(&h, "customers", t0);
        h.local
            .app_put("customers", customer(1, "c1", "Edited").stamped(h.clock.tick()));
        h.local
            .app_put("sessions", session("s1", "su1", 1).stamped(t0).synced());
        h.local
            .app_put("notes", note(10, "n1", "s1", "hi").stamped(t0).synced());
        h.master.tombstone("customers", &RecordId::Int(1));

        let report = pull(&h, "customers").unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].winner, Winner::Master);
        assert_eq!(report.conflicts[0].reason, ConflictReason::MasterNewer);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.written_back, 0);
        assert!(h.local.rows("customers").is_empty());
        assert!(h.local.rows("sessions").is_empty());
        assert!(h.local.rows("notes").is_empty());
        assert!(h.master.get("customers", &RecordId::Int(1)).unwrap().is_deleted());
    }

    #[test]
    fn reconciliation_reimports_missing_records() {
        let h = Harness::crm();
        let t0 = h.clock.tick();
        h.master.seed("customers", customer(1, "c1", "Ada").stamped(t0));
        set_watermark(&h, "customers", h.clock.tick());

        let report = pull(&h, "customers").unwrap();
        assert_eq!(report.fetched, 0);
        assert_eq!(report.reimported, 1);
        assert!(h.local.row("customers", &RecordId::Int(1)).is_some());
    }

    #[test]
    fn stale_local_tombstone_loses_to_newer_master() {
        let h = Harness::crm();
        let t0 = h.clock.tick();
        h.local.app_put(
            "customers",
            customer(1, "c1", "Ada").stamped(t0).tombstoned(),
        );
        let t1 = h.clock.tick();
        h.master.seed("customers", customer(1, "c1", "Ada v2").stamped(t1));
        set_watermark(&h, "customers", t1);

        let report = pull(&h, "customers").unwrap();
        assert_eq!(report.reimported, 1);
        assert_eq!(
            report.conflicts[0].reason,
            ConflictReason::StaleLocalTombstone
        );
        let row = h.local.row("customers", &RecordId::Int(1)).unwrap();
        assert!(!row.is_deleted());
        assert!(row.is_synced());
    }

    #[test]
    fn timeout_fails_the_whole_phase() {
        let h = Harness::crm();
        h.local.app_put("customers", customer(1, "c1", "Ada"));
        h.master
            .update_faults(|f| f.latency = Duration::from_secs(5));

        assert_eq!(
            push(&h, "customers").unwrap_err(),
            SyncError::Timeout(Duration::from_secs(1))
        );
        assert!(matches!(pull(&h, "customers"), Err(SyncError::Timeout(_))));
    }
}

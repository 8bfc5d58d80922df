//! Translation of cross-store references through `uuid`.
//!
//! The local and master stores may give the same logical record different
//! ids. A reference field is therefore never copied verbatim between stores:
//! the referenced record's `uuid` is looked up on the source side and the
//! record sharing it on the destination side supplies the id. When no match
//! exists the raw id is kept and a warning is logged.

use crate::context::CycleContext;
use crate::error::SyncResult;
use mergesync_model::{EntityDescriptor, LocalPredicate, MasterFilter, Record, RecordId};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Direction of a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    ToLocal,
    ToMaster,
}

/// Resolves reference fields for one entity phase.
///
/// Successful lookups are cached; misses are not, since the referenced
/// record may appear later in the cycle.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    cache: HashMap<(Direction, String, RecordId), RecordId>,
}

impl IdentityResolver {
    /// Creates a resolver with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a master id of `target` to the local id of the record sharing its `uuid`.
    pub fn master_ref_to_local(
        &mut self,
        ctx: &CycleContext<'_>,
        target: &str,
        master_ref: &RecordId,
    ) -> SyncResult<Option<RecordId>> {
        let key = (Direction::ToLocal, target.to_string(), master_ref.clone());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Some(hit.clone()));
        }

        let descriptor = ctx.registry.require(target)?;
        let Some(doc) = ctx
            .master
            .find_one(&descriptor.remote_collection, MasterFilter::by_id(master_ref.clone()))?
        else {
            return Ok(None);
        };
        let Some(uuid) = doc.uuid() else {
            return Ok(None);
        };

        let local_id = ctx
            .local
            .scan(&descriptor.local_table, &LocalPredicate::Uuid(uuid.to_string()))?
            .into_iter()
            .next()
            .map(|r| r.id);

        if let Some(id) = &local_id {
            self.cache.insert(key, id.clone());
        }
        Ok(local_id)
    }

    /// Maps a local id of `target` to the master id of the document sharing its `uuid`.
    pub fn local_ref_to_master(
        &mut self,
        ctx: &CycleContext<'_>,
        target: &str,
        local_ref: &RecordId,
    ) -> SyncResult<Option<RecordId>> {
        let key = (Direction::ToMaster, target.to_string(), local_ref.clone());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Some(hit.clone()));
        }

        let descriptor = ctx.registry.require(target)?;
        let Some(row) = ctx.local.get(&descriptor.local_table, local_ref)? else {
            return Ok(None);
        };
        let Some(uuid) = row.uuid() else {
            return Ok(None);
        };

        let master_id = ctx
            .master
            .find_one(&descriptor.remote_collection, MasterFilter::by_uuid(uuid))?
            .map(|d| d.id);

        if let Some(id) = &master_id {
            self.cache.insert(key, id.clone());
        }
        Ok(master_id)
    }

    /// Rewrites the reference fields of a master record into local ids.
    /// Returns the number of references left untranslated.
    pub fn resolve_incoming(
        &mut self,
        ctx: &CycleContext<'_>,
        descriptor: &EntityDescriptor,
        record: &mut Record,
    ) -> SyncResult<usize> {
        self.resolve(ctx, descriptor, record, Direction::ToLocal)
    }

    /// Rewrites the reference fields of a local record into master ids.
    /// Returns the number of references left untranslated.
    pub fn resolve_outgoing(
        &mut self,
        ctx: &CycleContext<'_>,
        descriptor: &EntityDescriptor,
        record: &mut Record,
    ) -> SyncResult<usize> {
        self.resolve(ctx, descriptor, record, Direction::ToMaster)
    }

    fn resolve(
        &mut self,
        ctx: &CycleContext<'_>,
        descriptor: &EntityDescriptor,
        record: &mut Record,
        direction: Direction,
    ) -> SyncResult<usize> {
        let mut unresolved = 0;
        for reference in &descriptor.references {
            let Some(raw) = record.get(&reference.field).and_then(RecordId::from_value) else {
                continue;
            };

            let resolved = match direction {
                Direction::ToLocal => self.master_ref_to_local(ctx, &reference.target, &raw)?,
                Direction::ToMaster => self.local_ref_to_master(ctx, &reference.target, &raw)?,
            };

            match resolved {
                Some(id) => {
                    if id != raw {
                        debug!(
                            entity = %descriptor.name,
                            field = %reference.field,
                            from = %raw,
                            to = %id,
                            "translated reference"
                        );
                    }
                    record.set(&reference.field, id.to_value());
                }
                None => {
                    warn!(
                        entity = %descriptor.name,
                        id = %record.id,
                        field = %reference.field,
                        target = %reference.target,
                        value = %raw,
                        ?direction,
                        "no counterpart for reference, keeping raw id"
                    );
                    unresolved += 1;
                }
            }
        }
        Ok(unresolved)
    }
}

//! Sync-column migration and `uuid` backfill.

use crate::error::SyncResult;
use mergesync_model::{EntityDescriptor, LocalPredicate, LocalStore};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// What the schema step changed for one entity type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaReport {
    /// Sync-control columns added to the table.
    pub columns_added: Vec<String>,
    /// Rows that received a fresh `uuid`.
    pub uuids_assigned: usize,
}

/// Adds any missing sync-control columns to the entity's table and gives
/// every row without a `uuid` a new random one.
pub fn ensure_sync_support(
    local: &dyn LocalStore,
    descriptor: &EntityDescriptor,
) -> SyncResult<SchemaReport> {
    let table = &descriptor.local_table;
    let columns_added = local.ensure_sync_columns(table)?;
    if !columns_added.is_empty() {
        info!(entity = %descriptor.name, columns = ?columns_added, "added sync columns");
    }

    let mut uuids_assigned = 0;
    for row in local.scan(table, &LocalPredicate::MissingUuid)? {
        if local.assign_uuid(table, &row.id, &Uuid::new_v4().to_string())? {
            uuids_assigned += 1;
        }
    }
    if uuids_assigned > 0 {
        info!(entity = %descriptor.name, uuids_assigned, "backfilled uuids");
    } else {
        debug!(entity = %descriptor.name, "sync columns present");
    }

    Ok(SchemaReport {
        columns_added,
        uuids_assigned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLocalStore;
    use mergesync_model::{Record, RecordId};

    #[test]
    fn adds_columns_and_backfills() {
        let store = MemoryLocalStore::new();
        store.create_table_with_columns("customers", &["name", "updated_at"]);
        store.app_put("customers", Record::new(1).with("name", "Ada"));
        store.app_put("customers", Record::new(2).with("name", "Bob"));

        let descriptor = EntityDescriptor::new("customers");
        let report = ensure_sync_support(&store, &descriptor).unwrap();
        assert_eq!(report.columns_added.len(), 4);
        assert_eq!(report.uuids_assigned, 2);

        let a = store.row("customers", &RecordId::Int(1)).unwrap();
        let b = store.row("customers", &RecordId::Int(2)).unwrap();
        assert!(a.uuid().is_some());
        assert_ne!(a.uuid(), b.uuid());
        assert!(!a.is_synced());

        let again = ensure_sync_support(&store, &descriptor).unwrap();
        assert!(again.columns_added.is_empty());
        assert_eq!(again.uuids_assigned, 0);
    }
}

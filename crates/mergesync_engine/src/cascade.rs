//! Transitive deletion along declared cascade rules.

use crate::error::SyncResult;
use mergesync_model::{EntityRegistry, LocalPredicate, LocalStore, RecordId};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Outcome of one cascade delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Rows physically removed, the root included.
    pub deleted: usize,
    /// Child branches that could not be removed.
    pub failures: usize,
}

/// Deletes a local record and, depth-first, every row that transitively
/// references it through the registry's cascade rules.
///
/// Children are removed before their parent. A failing child branch is
/// logged and counted without stopping its siblings or the parent. Re-running
/// after an interruption deletes whatever is left; a missing root is not an
/// error.
pub fn cascade_delete(
    local: &dyn LocalStore,
    registry: &EntityRegistry,
    entity: &str,
    id: &RecordId,
) -> SyncResult<CascadeReport> {
    let descriptor = registry.require(entity)?;
    let mut report = CascadeReport::default();
    let mut visited = HashSet::new();
    visited.insert((entity.to_string(), id.clone()));

    delete_children(local, registry, entity, id, &mut visited, &mut report);

    if local.delete(&descriptor.local_table, id)? {
        report.deleted += 1;
    }
    debug!(entity, %id, deleted = report.deleted, failures = report.failures, "cascade delete");
    Ok(report)
}

fn delete_children(
    local: &dyn LocalStore,
    registry: &EntityRegistry,
    entity: &str,
    id: &RecordId,
    visited: &mut HashSet<(String, RecordId)>,
    report: &mut CascadeReport,
) {
    for rule in registry.children_of(entity) {
        let Some(child) = registry.get(&rule.child) else {
            continue;
        };

        let rows = match local.scan(
            &child.local_table,
            &LocalPredicate::references(&rule.foreign_key, id),
        ) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(parent = entity, child = %rule.child, %id, error = %e, "cascade scan failed");
                report.failures += 1;
                continue;
            }
        };

        for row in rows {
            if !visited.insert((rule.child.clone(), row.id.clone())) {
                continue;
            }
            delete_children(local, registry, &rule.child, &row.id, visited, report);
            match local.delete(&child.local_table, &row.id) {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(entity = %rule.child, id = %row.id, error = %e, "cascade delete failed");
                    report.failures += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLocalStore;
    use mergesync_model::{EntityDescriptor, Record};

    fn registry() -> EntityRegistry {
        EntityRegistry::new(vec![
            EntityDescriptor::new("customers").with_cascade("sessions", "customer_id"),
            EntityDescriptor::new("sessions").with_cascade("notes", "session_id"),
            EntityDescriptor::new("notes"),
        ])
        .unwrap()
    }

    fn store() -> MemoryLocalStore {
        let store = MemoryLocalStore::new();
        for t in ["customers", "sessions", "notes"] {
            store.create_table(t);
        }
        store.app_put("customers", Record::new(1));
        store.app_put("customers", Record::new(2));
        store.app_put("sessions", Record::new("s1").with("customer_id", 1));
        store.app_put("sessions", Record::new("s2").with("customer_id", 1));
        store.app_put("sessions", Record::new("s3").with("customer_id", 2));
        store.app_put("notes", Record::new(10).with("session_id", "s1"));
        store.app_put("notes", Record::new(11).with("session_id", "s2"));
        store.app_put("notes", Record::new(12).with("session_id", "s3"));
        store
    }

    #[test]
    fn removes_children_and_grandchildren() {
        let store = store();
        let report = cascade_delete(&store, &registry(), "customers", &RecordId::Int(1)).unwrap();

        assert_eq!(report, CascadeReport { deleted: 5, failures: 0 });
        assert_eq!(store.rows("customers").len(), 1);
        assert_eq!(store.rows("sessions").len(), 1);
        assert_eq!(store.rows("notes").len(), 1);
        assert!(store.row("notes", &RecordId::Int(12)).is_some());
    }

    #[test]
    fn rerun_is_a_no_op() {
        let store = store();
        cascade_delete(&store, &registry(), "customers", &RecordId::Int(1)).unwrap();
        let again = cascade_delete(&store, &registry(), "customers", &RecordId::Int(1)).unwrap();
        assert_eq!(again, CascadeReport::default());
    }

    #[test]
    fn failing_branch_does_not_block_parent() {
        let store = MemoryLocalStore::new();
        store.create_table("customers");
        store.create_table("notes");
        // "sessions" table is missing, so that branch fails
        store.app_put("customers", Record::new(1));

        let report = cascade_delete(&store, &registry(), "customers", &RecordId::Int(1)).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.failures, 1);
        assert!(store.rows("customers").is_empty());
    }

    #[test]
    fn self_references_terminate() {
        let registry = EntityRegistry::new(vec![
            EntityDescriptor::new("folders").with_cascade("folders", "parent_id")
        ])
        .unwrap();
        let store = MemoryLocalStore::new();
        store.create_table("folders");
        store.app_put("folders", Record::new(1).with("parent_id", 1));
        store.app_put("folders", Record::new(2).with("parent_id", 1));
        store.app_put("folders", Record::new(3).with("parent_id", 2));

        let report = cascade_delete(&store, &registry, "folders", &RecordId::Int(1)).unwrap();
        assert_eq!(report.deleted, 3);
        assert!(store.rows("folders").is_empty());
    }
}

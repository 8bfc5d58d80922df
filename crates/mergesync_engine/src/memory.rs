//! In-memory local store.

use mergesync_model::fields;
use mergesync_model::{
    LocalPredicate, LocalStore, MetaStore, Record, RecordId, StoreError, StoreResult,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct MemoryTable {
    /// `None` accepts any field.
    columns: Option<BTreeSet<String>>,
    rows: BTreeMap<RecordId, Record>,
}

/// A `LocalStore` and `MetaStore` kept in memory.
///
/// Each method takes a single lock, so every engine mutation is atomic with
/// respect to concurrent application writes made through the `app_*`
/// helpers. Tables must be created before use; the key/value table springs
/// into existence on first write.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
    meta: RwLock<Option<HashMap<String, String>>>,
    meta_read_only: AtomicBool,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a schemaless table.
    pub fn create_table(&self, table: &str) {
        self.tables.write().entry(table.to_string()).or_default();
    }

    /// Creates a table with a fixed set of columns (besides `id`).
    pub fn create_table_with_columns(&self, table: &str, columns: &[&str]) {
        self.tables.write().insert(
            table.to_string(),
            MemoryTable {
                columns: Some(columns.iter().map(|c| c.to_string()).collect()),
                rows: BTreeMap::new(),
            },
        );
    }

    /// Writes a row as application code would.
    pub fn app_put(&self, table: &str, record: Record) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .rows
            .insert(record.id.clone(), record);
    }

    /// Edits a row in place as application code would.
    pub fn app_update(&self, table: &str, id: &RecordId, f: impl FnOnce(&mut Record)) -> bool {
        match self
            .tables
            .write()
            .get_mut(table)
            .and_then(|t| t.rows.get_mut(id))
        {
            Some(row) => {
                f(row);
                true
            }
            None => false,
        }
    }

    /// Reads a row directly.
    pub fn row(&self, table: &str, id: &RecordId) -> Option<Record> {
        self.tables
            .read()
            .get(table)
            .and_then(|t| t.rows.get(id))
            .cloned()
    }

    /// Reads every row of a table.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes key/value writes fail, to exercise persistence fallbacks.
    pub fn set_meta_read_only(&self, read_only: bool) {
        self.meta_read_only.store(read_only, Ordering::SeqCst);
    }

    fn with_table<T>(&self, table: &str, f: impl FnOnce(&MemoryTable) -> T) -> StoreResult<T> {
        self.tables
            .read()
            .get(table)
            .map(f)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    fn with_table_mut<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut MemoryTable) -> T,
    ) -> StoreResult<T> {
        self.tables
            .write()
            .get_mut(table)
            .map(f)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }
}

impl LocalStore for MemoryLocalStore {
    fn columns(&self, table: &str) -> StoreResult<Option<Vec<String>>> {
        self.with_table(table, |t| {
            t.columns.as_ref().map(|c| c.iter().cloned().collect())
        })
    }

    fn get(&self, table: &str, id: &RecordId) -> StoreResult<Option<Record>> {
        self.with_table(table, |t| t.rows.get(id).cloned())
    }

    fn scan(&self, table: &str, predicate: &LocalPredicate) -> StoreResult<Vec<Record>> {
        self.with_table(table, |t| {
            t.rows
                .values()
                .filter(|r| predicate.matches(r))
                .cloned()
                .collect()
        })
    }

    fn count(&self, table: &str, predicate: &LocalPredicate) -> StoreResult<usize> {
        self.with_table(table, |t| t.rows.values().filter(|r| predicate.matches(r)).count())
    }

    fn upsert(&self, table: &str, record: &Record) -> StoreResult<()> {
        self.with_table_mut(table, |t| {
            let mut row = record.clone();
            if let Some(columns) = &t.columns {
                row.fields.retain(|k, _| columns.contains(k));
            }
            t.rows.insert(row.id.clone(), row);
        })
    }

    fn insert(&self, table: &str, record: &Record) -> StoreResult<RecordId> {
        self.with_table_mut(table, |t| {
            let mut row = record.clone();
            if t.rows.contains_key(&row.id) {
                let max_int = t.rows.keys().filter_map(RecordId::as_int).max().unwrap_or(0);
                if let Some(free) = record
                    .id
                    .alternatives(record.uuid(), max_int)
                    .find(|id| !t.rows.contains_key(id))
                {
                    row.id = free;
                }
            }
            if let Some(columns) = &t.columns {
                row.fields.retain(|k, _| columns.contains(k));
            }
            let id = row.id.clone();
            t.rows.insert(id.clone(), row);
            id
        })
    }

    fn replace_if_unchanged(
        &self,
        table: &str,
        record: &Record,
        expected_updated_at: &Value,
    ) -> StoreResult<bool> {
        self.with_table_mut(table, |t| {
            let unchanged = t
                .rows
                .get(&record.id)
                .map(|row| row.get(fields::UPDATED_AT).unwrap_or(&Value::Null) == expected_updated_at)
                .unwrap_or(false);
            if !unchanged {
                return false;
            }
            let mut row = record.clone();
            if let Some(columns) = &t.columns {
                row.fields.retain(|k, _| columns.contains(k));
            }
            t.rows.insert(row.id.clone(), row);
            true
        })
    }

    fn delete(&self, table: &str, id: &RecordId) -> StoreResult<bool> {
        self.with_table_mut(table, |t| t.rows.remove(id).is_some())
    }

    fn mark_synced(
        &self,
        table: &str,
        id: &RecordId,
        expected_updated_at: &Value,
        updated_at: Option<&Value>,
    ) -> StoreResult<bool> {
        self.with_table_mut(table, |t| {
            let Some(row) = t.rows.get_mut(id) else {
                return false;
            };
            let current = row.get(fields::UPDATED_AT).unwrap_or(&Value::Null);
            if current != expected_updated_at {
                return false;
            }
            row.set_synced(true);
            if let Some(ts) = updated_at {
                row.set(fields::UPDATED_AT, ts.clone());
            }
            true
        })
    }

    fn ensure_sync_columns(&self, table: &str) -> StoreResult<Vec<String>> {
        self.with_table_mut(table, |t| {
            let Some(columns) = t.columns.as_mut() else {
                return Vec::new();
            };
            let mut added = Vec::new();
            for column in fields::SYNC_CONTROL {
                if columns.insert(column.to_string()) {
                    added.push(column.to_string());
                    for row in t.rows.values_mut() {
                        let default = match column {
                            fields::SYNCED | fields::DELETED => Value::from(0),
                            _ => Value::Null,
                        };
                        row.fields.entry(column.to_string()).or_insert(default);
                    }
                }
            }
            added
        })
    }

    fn assign_uuid(&self, table: &str, id: &RecordId, uuid: &str) -> StoreResult<bool> {
        self.with_table_mut(table, |t| match t.rows.get_mut(id) {
            Some(row) if row.uuid().is_none() => {
                row.set(fields::UUID, uuid);
                true
            }
            _ => false,
        })
    }
}

impl MetaStore for MemoryLocalStore {
    fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .meta
            .read()
            .as_ref()
            .and_then(|m| m.get(key).cloned()))
    }

    fn set_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        if self.meta_read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("key/value table is read-only".into()));
        }
        self.meta
            .write()
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

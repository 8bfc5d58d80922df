//! Interfaces of the stores the engine reconciles.
//!
//! The engine never talks to a concrete database. It needs a local store
//! (`LocalStore`), a master store (`MasterStore`) and a small key/value store
//! for its own bookkeeping (`MetaStore`). Every operation returns a
//! `StoreResult` so failures can be logged and skipped uniformly.

use crate::record::{Record, RecordId};
use crate::timestamp::Timestamp;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store is not reachable.
    #[error("not connected")]
    NotConnected,

    /// A call exceeded its time bound.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The table or collection does not exist.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A name could not be used as a table, collection or column.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A write violated a constraint.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if reconnecting may help.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, StoreError::NotConnected)
    }
}

/// Row selection for local scans.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalPredicate {
    /// Every row.
    All,
    /// Rows that are not tombstones.
    Active,
    /// Rows with `synced = 0` or null (edits and local deletions).
    PendingPush,
    /// The row carrying this `uuid`.
    Uuid(String),
    /// Rows whose field equals a value (foreign-key lookups).
    FieldEquals {
        /// Field name.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// Rows without a `uuid`.
    MissingUuid,
}

impl LocalPredicate {
    /// Rows whose `field` holds `id`.
    pub fn references(field: &str, id: &RecordId) -> Self {
        LocalPredicate::FieldEquals {
            field: field.to_string(),
            value: id.to_value(),
        }
    }

    /// Evaluates the predicate against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            LocalPredicate::All => true,
            LocalPredicate::Active => !record.is_deleted(),
            LocalPredicate::PendingPush => !record.is_synced(),
            LocalPredicate::Uuid(uuid) => record.uuid() == Some(uuid.as_str()),
            LocalPredicate::FieldEquals { field, value } => record
                .get(field)
                .map(|v| loosely_equal(v, value))
                .unwrap_or(false),
            LocalPredicate::MissingUuid => record.uuid().is_none(),
        }
    }
}

/// Compares stored values, treating `7` and `"7"` as the same id.
pub(crate) fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
        }
        _ => false,
    }
}

/// Document selection for master queries. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterFilter {
    /// Only documents with `updated_at` strictly after this time.
    pub updated_after: Option<Timestamp>,
    /// Only documents with this tombstone state.
    pub deleted: Option<bool>,
    /// Only the document with this id.
    pub id: Option<RecordId>,
    /// Only the document with this `uuid`.
    pub uuid: Option<String>,
    /// Maximum number of documents returned.
    pub limit: Option<usize>,
}

impl MasterFilter {
    /// Active (non-deleted) documents.
    pub fn active() -> Self {
        Self {
            deleted: Some(false),
            ..Self::default()
        }
    }

    /// Documents changed after a watermark, active or tombstoned.
    pub fn changed_since(watermark: Timestamp) -> Self {
        Self {
            updated_after: Some(watermark),
            ..Self::default()
        }
    }

    /// The document with a given id.
    pub fn by_id(id: RecordId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// The document with a given `uuid`.
    pub fn by_uuid(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            ..Self::default()
        }
    }

    /// Restricts to active documents.
    pub fn only_active(mut self) -> Self {
        self.deleted = Some(false);
        self
    }

    /// Caps the number of documents returned.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluates the non-limit criteria against a document.
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(deleted) = self.deleted {
            if record.is_deleted() != deleted {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if &record.id != id {
                return false;
            }
        }
        if let Some(uuid) = &self.uuid {
            if record.uuid() != Some(uuid.as_str()) {
                return false;
            }
        }
        if let Some(after) = self.updated_after {
            match record.updated_at() {
                Some(ts) if ts > after => {}
                _ => return false,
            }
        }
        true
    }
}

/// The device's embedded store.
///
/// Every mutating method must be a single atomic statement against the
/// store, because application code may write to the same rows concurrently.
pub trait LocalStore: Send + Sync {
    /// Returns the writable column names of a table, or `None` if the table
    /// accepts any field.
    fn columns(&self, table: &str) -> StoreResult<Option<Vec<String>>>;

    /// Reads one row.
    fn get(&self, table: &str, id: &RecordId) -> StoreResult<Option<Record>>;

    /// Reads every row matching a predicate.
    fn scan(&self, table: &str, predicate: &LocalPredicate) -> StoreResult<Vec<Record>>;

    /// Counts rows matching a predicate.
    fn count(&self, table: &str, predicate: &LocalPredicate) -> StoreResult<usize> {
        self.scan(table, predicate).map(|rows| rows.len())
    }

    /// Inserts a row or replaces the row with the same id.
    fn upsert(&self, table: &str, record: &Record) -> StoreResult<()>;

    /// Inserts a new row under the record's id, or under a free id from
    /// [`RecordId::alternatives`] if that one is taken. Never replaces an
    /// existing row. Returns the id the row was stored under.
    fn insert(&self, table: &str, record: &Record) -> StoreResult<RecordId>;

    /// Replaces an existing row only if its `updated_at` still equals
    /// `expected_updated_at` (`Null` matches a missing value). Returns false
    /// if the row changed or is gone.
    fn replace_if_unchanged(
        &self,
        table: &str,
        record: &Record,
        expected_updated_at: &Value,
    ) -> StoreResult<bool>;

    /// Physically removes a row. Returns false if it did not exist.
    fn delete(&self, table: &str, id: &RecordId) -> StoreResult<bool>;

    /// Sets `synced = 1` (and optionally a new `updated_at`) only if the
    /// row's `updated_at` still equals `expected_updated_at` (`Null` matches
    /// a missing value). Returns false if the row changed or is gone.
    fn mark_synced(
        &self,
        table: &str,
        id: &RecordId,
        expected_updated_at: &Value,
        updated_at: Option<&Value>,
    ) -> StoreResult<bool>;

    /// Adds any missing sync-control columns. Returns the columns added.
    fn ensure_sync_columns(&self, table: &str) -> StoreResult<Vec<String>>;

    /// Sets `uuid` on a row that has none. Returns false if the row already
    /// had one or does not exist.
    fn assign_uuid(&self, table: &str, id: &RecordId, uuid: &str) -> StoreResult<bool>;
}

/// The central store every device reconciles with.
///
/// `delete` is logical: the document becomes a tombstone (`deleted = 1`,
/// fresh `updated_at`) so other devices observe the deletion on their next
/// pull.
pub trait MasterStore: Send + Sync {
    /// Opens (or reopens) the connection. Every later call must honor
    /// `request_timeout`.
    fn connect(&self, request_timeout: Duration) -> StoreResult<()>;

    /// Returns true if the connection is usable.
    fn is_connected(&self) -> bool;

    /// Finds documents.
    fn find(&self, collection: &str, filter: &MasterFilter) -> StoreResult<Vec<Record>>;

    /// Counts documents.
    fn count(&self, collection: &str, filter: &MasterFilter) -> StoreResult<usize>;

    /// Inserts or replaces the document with the record's id.
    fn upsert(&self, collection: &str, record: &Record) -> StoreResult<()>;

    /// Inserts a new document under the record's id, or under a free id the
    /// store picks if that one is taken. Returns the id used.
    fn insert(&self, collection: &str, record: &Record) -> StoreResult<RecordId>;

    /// Tombstones a document. Returns false if no such document exists.
    fn delete(&self, collection: &str, id: &RecordId) -> StoreResult<bool>;
}

/// String key/value persistence for engine bookkeeping.
///
/// Reading a key before the backing table exists must return `Ok(None)`.
pub trait MetaStore: Send + Sync {
    /// Reads a value.
    fn get_meta(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a value.
    fn set_meta(&self, key: &str, value: &str) -> StoreResult<()>;
}

//! Syncable records.

use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Names of the fields the engine reads and writes on every record.
pub mod fields {
    /// Globally unique, immutable identity shared by both stores.
    pub const UUID: &str = "uuid";
    /// Pending-push flag: `0`/null = local changes not yet pushed, `1` = in sync.
    pub const SYNCED: &str = "synced";
    /// Device that last wrote the record.
    pub const DEVICE_ID: &str = "device_id";
    /// Tombstone flag: `1` = logically removed.
    pub const DELETED: &str = "deleted";
    /// Creation time.
    pub const CREATED_AT: &str = "created_at";
    /// Last modification time.
    pub const UPDATED_AT: &str = "updated_at";

    /// The four sync-control fields every syncable table carries.
    pub const SYNC_CONTROL: [&str; 4] = [UUID, SYNCED, DEVICE_ID, DELETED];
}

/// Native identifier of a record inside one store.
///
/// Identifiers may be integers (auto-increment rows) or text (document keys),
/// and the same logical entity may carry different ids in the two stores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Integer id.
    Int(i64),
    /// Text id.
    Text(String),
}

impl RecordId {
    /// Reads an id out of a field value.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) if !s.is_empty() => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts the id into a field value.
    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(i) => Value::from(*i),
            RecordId::Text(s) => Value::String(s.clone()),
        }
    }

    /// Returns the integer value of an integer id.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RecordId::Int(i) => Some(*i),
            RecordId::Text(_) => None,
        }
    }

    /// Candidate ids for a record whose own id is already taken.
    ///
    /// Integer ids continue after `max_int`, the largest integer id in use.
    /// Text ids try the record's `uuid`, then `{id}-2`, `{id}-3` and so on.
    /// The sequence is unbounded.
    pub fn alternatives<'a>(
        &'a self,
        uuid: Option<&'a str>,
        max_int: i64,
    ) -> Box<dyn Iterator<Item = RecordId> + 'a> {
        match self {
            RecordId::Int(_) => {
                Box::new((1i64..).map(move |n| RecordId::Int(max_int.saturating_add(n))))
            }
            RecordId::Text(text) => Box::new(
                uuid.into_iter()
                    .map(|u| RecordId::Text(u.to_string()))
                    .chain((2u64..).map(move |n| RecordId::Text(format!("{text}-{n}")))),
            ),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{i}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Int(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Text(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        RecordId::Text(id)
    }
}

/// One row or document of a syncable entity type.
///
/// `id` is the record's native id in the store it was read from; every other
/// column lives in `fields`, including the sync-control fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Native id in the owning store.
    pub id: RecordId,
    /// All other columns.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates an empty record with the given id.
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field value.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// Removes a field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Returns the record's globally unique id, if assigned.
    pub fn uuid(&self) -> Option<&str> {
        match self.fields.get(fields::UUID) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Returns true if the record matches the last-known remote state.
    ///
    /// A missing or null flag counts as pending.
    pub fn is_synced(&self) -> bool {
        self.flag(fields::SYNCED)
    }

    /// Returns true if the record is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.flag(fields::DELETED)
    }

    /// Returns the originating device.
    pub fn device_id(&self) -> Option<&str> {
        self.fields.get(fields::DEVICE_ID).and_then(Value::as_str)
    }

    /// Returns `updated_at`, if present and parseable.
    pub fn updated_at(&self) -> Option<Timestamp> {
        self.fields
            .get(fields::UPDATED_AT)
            .and_then(Timestamp::from_value)
    }

    /// Returns `created_at`, if present and parseable.
    pub fn created_at(&self) -> Option<Timestamp> {
        self.fields
            .get(fields::CREATED_AT)
            .and_then(Timestamp::from_value)
    }

    /// Returns `updated_at`, falling back to `created_at`.
    pub fn last_modified(&self) -> Option<Timestamp> {
        self.updated_at().or_else(|| self.created_at())
    }

    /// Sets the pending-push flag.
    pub fn set_synced(&mut self, synced: bool) {
        self.set(fields::SYNCED, i64::from(synced));
    }

    /// Sets the tombstone flag.
    pub fn set_deleted(&mut self, deleted: bool) {
        self.set(fields::DELETED, i64::from(deleted));
    }

    /// Sets `updated_at`.
    pub fn set_updated_at(&mut self, ts: Timestamp) {
        self.set(fields::UPDATED_AT, ts.to_value());
    }

    fn flag(&self, field: &str) -> bool {
        match self.fields.get(field) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
            Some(Value::String(s)) => matches!(s.as_str(), "1" | "true"),
            _ => false,
        }
    }
}

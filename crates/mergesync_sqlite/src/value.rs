//! Conversions between JSON field values and SQLite values.

use mergesync_model::RecordId;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // nested values are stored as JSON text
        other => SqlValue::Text(other.to_string()),
    }
}

pub(crate) fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

pub(crate) fn id_to_sql(id: &RecordId) -> SqlValue {
    match id {
        RecordId::Int(i) => SqlValue::Integer(*i),
        RecordId::Text(s) => SqlValue::Text(s.clone()),
    }
}

pub(crate) fn id_from_sql(value: ValueRef<'_>) -> Option<RecordId> {
    match value {
        ValueRef::Integer(i) => Some(RecordId::Int(i)),
        ValueRef::Text(bytes) => Some(RecordId::Text(String::from_utf8_lossy(bytes).into_owned())),
        _ => None,
    }
}

//! SQL text building.

use crate::value::to_sql;
use mergesync_model::fields;
use mergesync_model::{LocalPredicate, StoreError, StoreResult};
use rusqlite::types::Value as SqlValue;

/// Quotes a table or column name after checking it is a plain identifier.
pub(crate) fn quote(name: &str) -> StoreResult<String> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Renders a predicate as a `WHERE` condition and its parameters.
pub(crate) fn condition(predicate: &LocalPredicate) -> StoreResult<(String, Vec<SqlValue>)> {
    Ok(match predicate {
        LocalPredicate::All => ("1 = 1".to_string(), Vec::new()),
        LocalPredicate::Active => (
            format!("COALESCE({}, 0) = 0", quote(fields::DELETED)?),
            Vec::new(),
        ),
        LocalPredicate::PendingPush => (
            format!("COALESCE({}, 0) = 0", quote(fields::SYNCED)?),
            Vec::new(),
        ),
        LocalPredicate::Uuid(uuid) => (
            format!("{} = ?1", quote(fields::UUID)?),
            vec![SqlValue::Text(uuid.clone())],
        ),
        LocalPredicate::FieldEquals { field, value } => {
            (format!("{} = ?1", quote(field)?), vec![to_sql(value)])
        }
        LocalPredicate::MissingUuid => {
            let uuid = quote(fields::UUID)?;
            (format!("({uuid} IS NULL OR {uuid} = '')"), Vec::new())
        }
    })
}

/// Declared type of an added sync-control column.
pub(crate) fn sync_column_type(column: &str) -> &'static str {
    match column {
        fields::SYNCED | fields::DELETED => "INTEGER NOT NULL DEFAULT 0",
        _ => "TEXT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergesync_model::RecordId;

    #[test]
    fn quotes_plain_identifiers_only() {
        assert_eq!(quote("customer_sessions").unwrap(), "\"customer_sessions\"");
        assert!(quote("x; DROP TABLE y").is_err());
        assert!(quote("1abc").is_err());
        assert!(quote("").is_err());
    }

    #[test]
    fn renders_predicates() {
        let (sql, params) = condition(&LocalPredicate::references("customer_id", &RecordId::Int(7))).unwrap();
        assert_eq!(sql, "\"customer_id\" = ?1");
        assert_eq!(params, vec![SqlValue::Integer(7)]);

        let (sql, params) = condition(&LocalPredicate::PendingPush).unwrap();
        assert_eq!(sql, "COALESCE(\"synced\", 0) = 0");
        assert!(params.is_empty());
    }
}

//! `LocalStore` and `MetaStore` over a SQLite connection.

use crate::sql::{condition, quote, sync_column_type};
use crate::value::{from_sql, id_from_sql, id_to_sql, to_sql};
use mergesync_model::fields;
use mergesync_model::{
    LocalPredicate, LocalStore, MetaStore, Record, RecordId, StoreError, StoreResult,
};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

/// Name of the key/value table holding watermarks and the device id.
pub const SYNC_STATE_TABLE: &str = "sync_state";

const PRIMARY_KEY: &str = "id";

/// A local store backed by one SQLite database.
///
/// Application tables are used as they are: the store discovers their
/// columns at call time and only writes the ones that exist.
#[derive(Debug)]
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
}

impl SqliteLocalStore {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Backend(format!("failed to open {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "opened local database");
        Ok(Self::from_connection(conn))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(format!("failed to open in-memory database: {e}")))?;
        Ok(Self::from_connection(conn))
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Runs application SQL (schema creation, direct edits) on the shared
    /// connection.
    pub fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.conn.lock().execute_batch(sql).map_err(store_error)
    }

    /// Runs a closure against the connection while holding its lock.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        f(&self.conn.lock()).map_err(store_error)
    }

    fn select(
        conn: &Connection,
        table: &str,
        condition: &str,
        params: &[SqlValue],
    ) -> StoreResult<Vec<Record>> {
        let sql = format!("SELECT * FROM {} WHERE {condition}", quote(table)?);
        let mut stmt = conn.prepare(&sql).map_err(store_error)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(params.iter())).map_err(store_error)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(store_error)? {
            let mut id = None;
            let mut map = Map::new();
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i).map_err(store_error)?;
                if name == PRIMARY_KEY {
                    id = id_from_sql(value);
                } else {
                    map.insert(name.clone(), from_sql(value));
                }
            }
            match id {
                Some(id) => records.push(Record { id, fields: map }),
                None => debug!(table, "skipping row without a usable id"),
            }
        }
        Ok(records)
    }

    /// Writable columns of a table, or `UnknownTable` if it has none.
    fn table_columns(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", quote(table)?);
        let mut stmt = conn.prepare(&sql).map_err(store_error)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(store_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error)?;
        if names.is_empty() {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        Ok(names.into_iter().filter(|n| n != PRIMARY_KEY).collect())
    }

    /// The record's fields that the table can hold.
    fn writable<'r>(columns: &[String], record: &'r Record) -> Vec<(&'r str, SqlValue)> {
        record
            .fields
            .iter()
            .filter(|(k, _)| columns.iter().any(|c| c == *k))
            .map(|(k, v)| (k.as_str(), to_sql(v)))
            .collect()
    }

    /// Returns true if a row with this id exists.
    fn exists(conn: &Connection, table: &str, id: &RecordId) -> StoreResult<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?1",
            quote(table)?,
            quote(PRIMARY_KEY)?
        );
        conn.query_row(&sql, [id_to_sql(id)], |_| Ok(()))
            .optional()
            .map(|row| row.is_some())
            .map_err(store_error)
    }

    /// Largest integer id in a table, or 0.
    fn max_int_id(conn: &Connection, table: &str) -> StoreResult<i64> {
        let pk = quote(PRIMARY_KEY)?;
        let sql = format!(
            "SELECT COALESCE(MAX({pk}), 0) FROM {} WHERE typeof({pk}) = 'integer'",
            quote(table)?
        );
        conn.query_row(&sql, [], |row| row.get(0))
            .map_err(store_error)
    }

    /// `INSERT` of the key plus the given columns, numbered from `?1`.
    fn insert_statement(table: &str, values: &[(&str, SqlValue)]) -> StoreResult<String> {
        let mut names = vec![quote(PRIMARY_KEY)?];
        for (name, _) in values {
            names.push(quote(name)?);
        }
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table)?,
            names.join(", "),
            placeholders.join(", "),
        ))
    }

    /// Appends `updated_at IS ?` to a guard if the table tracks it.
    fn guard(
        columns: &[String],
        expected: &Value,
        sql: &mut String,
        params: &mut Vec<SqlValue>,
    ) -> StoreResult<()> {
        if columns.iter().any(|c| c == fields::UPDATED_AT) {
            params.push(to_sql(expected));
            sql.push_str(&format!(
                " AND {} IS ?{}",
                quote(fields::UPDATED_AT)?,
                params.len()
            ));
        }
        Ok(())
    }
}

/// Maps a rusqlite error onto the store error kinds the engine understands.
fn store_error(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, msg) => {
            let msg = msg.clone().unwrap_or_else(|| e.to_string());
            if err.code == ErrorCode::ConstraintViolation {
                StoreError::Constraint(msg)
            } else if let Some(table) = msg.strip_prefix("no such table: ") {
                StoreError::UnknownTable(table.to_string())
            } else {
                StoreError::Backend(msg)
            }
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

impl LocalStore for SqliteLocalStore {
    fn columns(&self, table: &str) -> StoreResult<Option<Vec<String>>> {
        Self::table_columns(&self.conn.lock(), table).map(Some)
    }

    fn get(&self, table: &str, id: &RecordId) -> StoreResult<Option<Record>> {
        let conn = self.conn.lock();
        let condition = format!("{} = ?1", quote(PRIMARY_KEY)?);
        let mut rows = Self::select(&conn, table, &condition, &[id_to_sql(id)])?;
        Ok(rows.pop())
    }

    fn scan(&self, table: &str, predicate: &LocalPredicate) -> StoreResult<Vec<Record>> {
        let (condition, params) = condition(predicate)?;
        Self::select(&self.conn.lock(), table, &condition, &params)
    }

    fn count(&self, table: &str, predicate: &LocalPredicate) -> StoreResult<usize> {
        let (condition, params) = condition(predicate)?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {condition}", quote(table)?);
        let count: i64 = self
            .conn
            .lock()
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(store_error)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn upsert(&self, table: &str, record: &Record) -> StoreResult<()> {
        let conn = self.conn.lock();
        let columns = Self::table_columns(&conn, table)?;
        let values = Self::writable(&columns, record);

        let mut updates = Vec::with_capacity(values.len());
        for (name, _) in &values {
            let quoted = quote(name)?;
            updates.push(format!("{quoted} = excluded.{quoted}"));
        }
        let on_conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let sql = format!(
            "{} ON CONFLICT({}) {on_conflict}",
            Self::insert_statement(table, &values)?,
            quote(PRIMARY_KEY)?,
        );

        let params = std::iter::once(id_to_sql(&record.id)).chain(values.into_iter().map(|(_, v)| v));
        conn.execute(&sql, params_from_iter(params))
            .map_err(store_error)?;
        Ok(())
    }

    fn insert(&self, table: &str, record: &Record) -> StoreResult<RecordId> {
        let conn = self.conn.lock();
        let columns = Self::table_columns(&conn, table)?;
        let mut id = record.id.clone();
        if Self::exists(&conn, table, &id)? {
            let max_int = Self::max_int_id(&conn, table)?;
            for candidate in record.id.alternatives(record.uuid(), max_int) {
                if !Self::exists(&conn, table, &candidate)? {
                    id = candidate;
                    break;
                }
            }
            debug!(table, requested = %record.id, assigned = %id, "id taken, inserting under a new id");
        }

        let values = Self::writable(&columns, record);
        let sql = Self::insert_statement(table, &values)?;
        let params = std::iter::once(id_to_sql(&id)).chain(values.into_iter().map(|(_, v)| v));
        conn.execute(&sql, params_from_iter(params))
            .map_err(store_error)?;
        Ok(id)
    }

    fn replace_if_unchanged(
        &self,
        table: &str,
        record: &Record,
        expected_updated_at: &Value,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let columns = Self::table_columns(&conn, table)?;
        let values = Self::writable(&columns, record);

        let mut params = vec![id_to_sql(&record.id)];
        let mut sets = Vec::with_capacity(values.len());
        for (name, value) in values {
            params.push(value);
            sets.push(format!("{} = ?{}", quote(name)?, params.len()));
        }
        if sets.is_empty() {
            sets.push(format!("{0} = {0}", quote(PRIMARY_KEY)?));
        }
        let mut sql = format!(
            "UPDATE {} SET {} WHERE {} = ?1",
            quote(table)?,
            sets.join(", "),
            quote(PRIMARY_KEY)?,
        );
        Self::guard(&columns, expected_updated_at, &mut sql, &mut params)?;

        let changed = conn
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(store_error)?;
        Ok(changed > 0)
    }

    fn delete(&self, table: &str, id: &RecordId) -> StoreResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote(table)?,
            quote(PRIMARY_KEY)?
        );
        let changed = self
            .conn
            .lock()
            .execute(&sql, [id_to_sql(id)])
            .map_err(store_error)?;
        Ok(changed > 0)
    }

    fn mark_synced(
        &self,
        table: &str,
        id: &RecordId,
        expected_updated_at: &Value,
        updated_at: Option<&Value>,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let columns = Self::table_columns(&conn, table)?;

        let mut params = vec![id_to_sql(id)];
        let mut sets = vec![format!("{} = 1", quote(fields::SYNCED)?)];
        if let Some(ts) = updated_at {
            params.push(to_sql(ts));
            sets.push(format!("{} = ?{}", quote(fields::UPDATED_AT)?, params.len()));
        }
        let mut sql = format!(
            "UPDATE {} SET {} WHERE {} = ?1",
            quote(table)?,
            sets.join(", "),
            quote(PRIMARY_KEY)?,
        );
        Self::guard(&columns, expected_updated_at, &mut sql, &mut params)?;

        let changed = conn
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(store_error)?;
        Ok(changed > 0)
    }

    fn ensure_sync_columns(&self, table: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let existing = Self::table_columns(&conn, table)?;
        let mut added = Vec::new();
        for column in fields::SYNC_CONTROL {
            if existing.iter().any(|c| c == column) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote(table)?,
                quote(column)?,
                sync_column_type(column)
            );
            conn.execute_batch(&sql).map_err(store_error)?;
            info!(table, column, "added sync column");
            added.push(column.to_string());
        }
        Ok(added)
    }

    fn assign_uuid(&self, table: &str, id: &RecordId, uuid: &str) -> StoreResult<bool> {
        let column = quote(fields::UUID)?;
        let sql = format!(
            "UPDATE {} SET {column} = ?1 WHERE {} = ?2 AND ({column} IS NULL OR {column} = '')",
            quote(table)?,
            quote(PRIMARY_KEY)?,
        );
        let changed = self
            .conn
            .lock()
            .execute(&sql, params![uuid, id_to_sql(id)])
            .map_err(store_error)?;
        Ok(changed > 0)
    }
}

impl MetaStore for SqliteLocalStore {
    fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        let sql = format!("SELECT value FROM {SYNC_STATE_TABLE} WHERE key = ?1");
        let result = self
            .conn
            .lock()
            .query_row(&sql, [key], |row| row.get::<_, String>(0))
            .optional()
            .map_err(store_error);
        match result {
            Err(StoreError::UnknownTable(_)) => Ok(None),
            other => other,
        }
    }

    fn set_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {SYNC_STATE_TABLE} (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )"
        ))
        .map_err(store_error)?;
        conn.execute(
            &format!(
                "INSERT INTO {SYNC_STATE_TABLE} (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value"
            ),
            params![key, value],
        )
        .map_err(store_error)?;
        Ok(())
    }
}

//! # mergesync sqlite
//!
//! SQLite implementation of the mergesync local store.
//!
//! This crate provides:
//! - `SqliteLocalStore`, a `LocalStore` over ordinary application tables
//! - Schema introspection through `PRAGMA table_info`
//! - Sync-column migration (`ALTER TABLE ... ADD COLUMN`) and `uuid` backfill
//! - A `sync_state` key/value table for watermarks and the device id
//!
//! Every syncable table must have an `id` primary key. Each engine call runs
//! as one SQL statement under the connection lock, so it cannot interleave
//! with other writers on the same connection.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod sql;
mod store;
mod value;

pub use store::{SqliteLocalStore, SYNC_STATE_TABLE};

//! Fixture registries and record builders.
//!
//! The fixtures model a small CRM: customers own sessions, sessions own
//! notes, and settings stand alone.
//!
//! ```text
//! customers ──< sessions ──< notes
//! settings
//! ```

use mergesync_model::{EntityDescriptor, EntityRegistry, Record, RecordId, Timestamp};
use tracing_subscriber::EnvFilter;

/// Descriptors for the CRM fixture, in a deliberately scrambled order so
/// tests exercise dependency ordering.
pub fn crm_descriptors() -> Vec<EntityDescriptor> {
    vec![
        EntityDescriptor::new("notes").with_reference("session_id", "sessions"),
        EntityDescriptor::new("sessions")
            .with_remote_collection("customer_sessions")
            .with_reference("customer_id", "customers")
            .with_cascade("notes", "session_id"),
        EntityDescriptor::new("customers").with_cascade("sessions", "customer_id"),
        EntityDescriptor::new("settings"),
    ]
}

/// The CRM fixture registry.
pub fn crm_registry() -> EntityRegistry {
    match EntityRegistry::new(crm_descriptors()) {
        Ok(registry) => registry,
        Err(e) => panic!("fixture registry is invalid: {e}"),
    }
}

/// A customer row (active, pending push).
pub fn customer(id: impl Into<RecordId>, uuid: &str, name: &str) -> Record {
    Record::new(id)
        .with("uuid", uuid)
        .with("name", name)
        .with("deleted", 0)
        .with("synced", 0)
}

/// A session row referencing a customer (active, pending push).
pub fn session(id: impl Into<RecordId>, uuid: &str, customer_id: impl Into<RecordId>) -> Record {
    Record::new(id)
        .with("uuid", uuid)
        .with("customer_id", customer_id.into().to_value())
        .with("deleted", 0)
        .with("synced", 0)
}

/// A note row referencing a session (active, pending push).
pub fn note(id: impl Into<RecordId>, uuid: &str, session_id: impl Into<RecordId>, body: &str) -> Record {
    Record::new(id)
        .with("uuid", uuid)
        .with("session_id", session_id.into().to_value())
        .with("body", body)
        .with("deleted", 0)
        .with("synced", 0)
}

/// Builder helpers for sync-control fields.
pub trait RecordExt: Sized {
    /// Sets `updated_at` (and `created_at` if absent).
    fn stamped(self, ts: Timestamp) -> Self;
    /// Marks the record as matching the remote state.
    fn synced(self) -> Self;
    /// Marks the record as having unpushed changes.
    fn pending(self) -> Self;
    /// Turns the record into a tombstone.
    fn tombstoned(self) -> Self;
    /// Sets the originating device.
    fn from_device(self, device_id: &str) -> Self;
}

impl RecordExt for Record {
    fn stamped(mut self, ts: Timestamp) -> Self {
        if self.get("created_at").is_none() {
            self.set("created_at", ts.to_value());
        }
        self.set_updated_at(ts);
        self
    }

    fn synced(mut self) -> Self {
        self.set_synced(true);
        self
    }

    fn pending(mut self) -> Self {
        self.set_synced(false);
        self
    }

    fn tombstoned(mut self) -> Self {
        self.set_deleted(true);
        self
    }

    fn from_device(self, device_id: &str) -> Self {
        self.with("device_id", device_id)
    }
}

/// Installs a test tracing subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

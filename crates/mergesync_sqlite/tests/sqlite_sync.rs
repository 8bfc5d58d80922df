//! Full sync cycles with SQLite devices against an in-memory master.

use mergesync_engine::{RetryConfig, SyncConfig, SyncOrchestrator, DEVICE_ID_KEY};
use mergesync_master::MemoryMasterStore;
use mergesync_model::{LocalPredicate, LocalStore, MetaStore, RecordId};
use mergesync_sqlite::SqliteLocalStore;
use mergesync_testkit::prelude::*;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS customers (
        id INTEGER PRIMARY KEY, name TEXT,
        uuid TEXT, synced INTEGER DEFAULT 0, deleted INTEGER DEFAULT 0, device_id TEXT,
        created_at TEXT, updated_at TEXT);
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY, customer_id INTEGER,
        uuid TEXT, synced INTEGER DEFAULT 0, deleted INTEGER DEFAULT 0, device_id TEXT,
        created_at TEXT, updated_at TEXT);
    CREATE TABLE IF NOT EXISTS notes (
        id INTEGER PRIMARY KEY, session_id TEXT, body TEXT,
        uuid TEXT, synced INTEGER DEFAULT 0, deleted INTEGER DEFAULT 0, device_id TEXT,
        created_at TEXT, updated_at TEXT);
    CREATE TABLE IF NOT EXISTS settings (
        id TEXT PRIMARY KEY, value TEXT, created_at TEXT, updated_at TEXT);
";

type Engine = SyncOrchestrator<SqliteLocalStore, MemoryMasterStore>;

struct World {
    master: Arc<MemoryMasterStore>,
    clock: Arc<ManualClock>,
}

impl World {
    fn new() -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::default());
        Self {
            master: Arc::new(MemoryMasterStore::with_clock(clock.clone())),
            clock,
        }
    }

    fn engine(&self, local: Arc<SqliteLocalStore>) -> Engine {
        let config = SyncConfig::default()
            .with_request_timeout(Duration::from_secs(1))
            .with_retry(RetryConfig::no_retry())
            .with_schema_check(true);
        SyncOrchestrator::with_clock(
            config,
            crm_registry(),
            local,
            self.master.clone(),
            self.clock.clone(),
        )
    }
}

fn in_memory() -> Arc<SqliteLocalStore> {
    let store = SqliteLocalStore::open_in_memory().unwrap();
    store.execute_batch(SCHEMA).unwrap();
    Arc::new(store)
}

fn on_disk(path: &Path) -> Arc<SqliteLocalStore> {
    let store = SqliteLocalStore::open(path).unwrap();
    store.execute_batch(SCHEMA).unwrap();
    Arc::new(store)
}

#[test]
fn records_travel_between_sqlite_devices() {
    let world = World::new();
    let a_store = in_memory();
    let b_store = in_memory();
    let a = world.engine(a_store.clone());
    let b = world.engine(b_store.clone());

    let ts = world.clock.tick();
    a_store.upsert("customers", &customer(1, "c1", "Ada").stamped(ts)).unwrap();
    a_store.upsert("sessions", &session("s1", "su1", 1).stamped(ts)).unwrap();
    a_store
        .upsert("notes", &note(10, "n1", "s1", "first visit").stamped(ts))
        .unwrap();

    let pushed = a.perform_full_merge_sync().unwrap();
    assert!(pushed.success, "{:?}", pushed.errors);
    assert_eq!(pushed.total_pushed, 3);
    assert_eq!(a_store.count("customers", &LocalPredicate::PendingPush).unwrap(), 0);

    let pulled = b.perform_full_merge_sync().unwrap();
    assert!(pulled.success, "{:?}", pulled.errors);
    assert_eq!(pulled.total_pulled, 3);
    let note = b_store.get("notes", &RecordId::Int(10)).unwrap().unwrap();
    assert_eq!(note.get("body"), Some(&json!("first visit")));
    assert_eq!(note.get("session_id"), Some(&json!("s1")));
    assert!(note.is_synced());

    let again = b.perform_full_merge_sync().unwrap();
    assert_eq!(again.total_pulled, 0);
    assert_eq!(again.total_pushed, 0);
}

#[test]
fn pulled_references_point_at_local_ids() {
    let world = World::new();
    world
        .master
        .seed("customers", customer(101, "c1", "Ada").stamped(world.clock.tick()));
    world.master.seed(
        "customer_sessions",
        session("s1", "su1", 101).stamped(world.clock.tick()),
    );

    let store = in_memory();
    store
        .upsert("customers", &customer(7, "c1", "Ada").synced())
        .unwrap();
    let engine = world.engine(store.clone());

    let result = engine.perform_full_merge_sync().unwrap();
    assert!(result.success, "{:?}", result.errors);
    let session = store.get("sessions", &RecordId::from("s1")).unwrap().unwrap();
    assert_eq!(session.get("customer_id"), Some(&json!(7)));
    assert!(store.get("customers", &RecordId::Int(101)).unwrap().is_none());
}

#[test]
fn master_tombstone_cascades_through_sqlite_tables() {
    let world = World::new();
    let a_store = in_memory();
    let a = world.engine(a_store.clone());
    let ts = world.clock.tick();
    a_store.upsert("customers", &customer(1, "c1", "Ada").stamped(ts)).unwrap();
    a_store.upsert("sessions", &session("s1", "su1", 1).stamped(ts)).unwrap();
    a_store.upsert("notes", &note(10, "n1", "s1", "x").stamped(ts)).unwrap();
    a.perform_full_merge_sync().unwrap();

    world.master.tombstone("customers", &RecordId::Int(1));
    let result = a.perform_full_merge_sync().unwrap();

    assert!(result.success, "{:?}", result.errors);
    for table in ["customers", "sessions", "notes"] {
        assert_eq!(a_store.count(table, &LocalPredicate::All).unwrap(), 0, "{table}");
    }
}

#[test]
fn legacy_table_is_prepared_and_pushed() {
    let world = World::new();
    let store = in_memory();
    store
        .execute_batch(
            "INSERT INTO settings (id, value, updated_at) VALUES ('theme', 'dark', '2024-01-01T00:00:00.000Z');",
        )
        .unwrap();
    let engine = world.engine(store.clone());

    let result = engine.perform_full_merge_sync().unwrap();
    assert!(result.success, "{:?}", result.errors);

    let row = store.get("settings", &RecordId::from("theme")).unwrap().unwrap();
    assert!(row.is_synced());
    let uuid = row.uuid().unwrap().to_string();
    let doc = world
        .master
        .get("settings", &RecordId::from("theme"))
        .unwrap();
    assert_eq!(doc.uuid(), Some(uuid.as_str()));
    assert_eq!(doc.get("value"), Some(&json!("dark")));
}

#[test]
fn device_id_and_watermarks_survive_reopening() {
    let world = World::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.db");

    let first_id = {
        let store = on_disk(&path);
        let engine = world.engine(store.clone());
        store
            .upsert("customers", &customer(1, "c1", "Ada").stamped(world.clock.tick()))
            .unwrap();
        assert!(engine.perform_full_merge_sync().unwrap().success);
        engine.device_id()
    };

    let store = on_disk(&path);
    assert_eq!(store.get_meta(DEVICE_ID_KEY).unwrap(), Some(first_id.clone()));
    assert!(store.get_meta("last_sync:customers").unwrap().is_some());

    let engine = world.engine(store);
    assert_eq!(engine.device_id(), first_id);
    let result = engine.perform_full_merge_sync().unwrap();
    assert_eq!(result.total_pulled, 0);
    assert_eq!(result.total_pushed, 0);
}

#[test]
fn rowid_clash_between_devices_is_resolved() {
    let world = World::new();
    let a_store = in_memory();
    let b_store = in_memory();
    let a = world.engine(a_store.clone());
    let b = world.engine(b_store.clone());
    a_store
        .upsert("customers", &customer(1, "ca", "Ada").stamped(world.clock.tick()))
        .unwrap();
    b_store
        .upsert("customers", &customer(1, "cb", "Bob").stamped(world.clock.tick()))
        .unwrap();

    assert!(a.perform_full_merge_sync().unwrap().success);
    let result = b.perform_full_merge_sync().unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.total_pulled, 1);
    assert_eq!(result.total_pushed, 1);

    let cb = world.master.get_by_uuid("customers", "cb").unwrap();
    assert_ne!(cb.id, RecordId::Int(1));
    let ca = b_store
        .scan("customers", &LocalPredicate::Uuid("ca".into()))
        .unwrap();
    assert_eq!(ca.len(), 1);
    assert_eq!(ca[0].id, RecordId::Int(2));
    assert_eq!(b_store.count("customers", &LocalPredicate::All).unwrap(), 2);

    let again = b.perform_full_merge_sync().unwrap();
    assert_eq!(again.total_pulled, 0);
    assert_eq!(again.total_pushed, 0);
}

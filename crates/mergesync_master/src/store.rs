//! In-memory master store.

use crate::collection::Collection;
use crate::faults::Faults;
use mergesync_model::{
    Clock, MasterFilter, MasterStore, Record, RecordId, StoreError, StoreResult, SystemClock,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A `MasterStore` keeping document collections in memory.
///
/// Missing collections behave as empty ones. Deleting a document turns it
/// into a tombstone stamped with the store's clock; `purge` removes a
/// document outright, which is how tests simulate records disappearing from
/// the master behind the devices' backs.
///
/// # Example
///
/// ```
/// use mergesync_master::MemoryMasterStore;
/// use mergesync_model::{MasterFilter, MasterStore, Record};
/// use std::time::Duration;
///
/// let master = MemoryMasterStore::new();
/// master.connect(Duration::from_secs(5)).unwrap();
/// master.upsert("customers", &Record::new(101).with("uuid", "c1")).unwrap();
/// assert_eq!(master.count("customers", &MasterFilter::active()).unwrap(), 1);
/// ```
pub struct MemoryMasterStore {
    collections: RwLock<HashMap<String, Collection>>,
    connected: AtomicBool,
    request_timeout: RwLock<Duration>,
    faults: RwLock<Faults>,
    clock: Arc<dyn Clock>,
}

impl MemoryMasterStore {
    /// Creates an empty, disconnected store using wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty, disconnected store with a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
            request_timeout: RwLock::new(Duration::from_secs(30)),
            faults: RwLock::new(Faults::none()),
            clock,
        }
    }

    /// Writes a document directly, bypassing connection state and faults.
    pub fn seed(&self, collection: &str, record: Record) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .upsert(record);
    }

    /// Reads a document directly.
    pub fn get(&self, collection: &str, id: &RecordId) -> Option<Record> {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned()
    }

    /// Reads the document carrying a `uuid`.
    pub fn get_by_uuid(&self, collection: &str, uuid: &str) -> Option<Record> {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.find(&MasterFilter::by_uuid(uuid)).into_iter().next())
    }

    /// Tombstones a document directly, bypassing connection state and faults.
    pub fn tombstone(&self, collection: &str, id: &RecordId) -> bool {
        let now = self.clock.now();
        let mut collections = self.collections.write();
        match collections.get_mut(collection).and_then(|c| c.get_mut(id)) {
            Some(doc) => {
                doc.set_deleted(true);
                doc.set_updated_at(now);
                true
            }
            None => false,
        }
    }

    /// Physically removes a document.
    pub fn purge(&self, collection: &str, id: &RecordId) -> Option<Record> {
        self.collections
            .write()
            .get_mut(collection)
            .and_then(|c| c.remove(id))
    }

    /// Returns every document of a collection, tombstones included.
    pub fn documents(&self, collection: &str) -> Vec<Record> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.find(&MasterFilter::default()))
            .unwrap_or_default()
    }

    /// Simulates the connection dropping or coming back.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Replaces the injected faults.
    pub fn set_faults(&self, faults: Faults) {
        *self.faults.write() = faults;
    }

    /// Edits the injected faults in place.
    pub fn update_faults(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.faults.write());
    }

    fn check_call(&self) -> StoreResult<()> {
        if !self.is_connected() {
            return Err(StoreError::NotConnected);
        }
        let timeout = *self.request_timeout.read();
        let latency = self.faults.read().latency;
        if latency > timeout {
            return Err(StoreError::Timeout(timeout));
        }
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        Ok(())
    }

    fn check_query(&self, collection: &str) -> StoreResult<()> {
        self.check_call()?;
        if self.faults.read().query_fails(collection) {
            return Err(StoreError::Backend(format!(
                "query on {collection} failed"
            )));
        }
        Ok(())
    }

    fn check_write(&self, id: &RecordId) -> StoreResult<()> {
        self.check_call()?;
        if self.faults.read().write_fails(id) {
            return Err(StoreError::Constraint(format!("write to {id} rejected")));
        }
        Ok(())
    }
}

impl Default for MemoryMasterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterStore for MemoryMasterStore {
    fn connect(&self, request_timeout: Duration) -> StoreResult<()> {
        if self.faults.read().refuse_connections {
            return Err(StoreError::NotConnected);
        }
        *self.request_timeout.write() = request_timeout;
        self.connected.store(true, Ordering::SeqCst);
        debug!(?request_timeout, "master connection opened");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn find(&self, collection: &str, filter: &MasterFilter) -> StoreResult<Vec<Record>> {
        self.check_query(collection)?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.find(filter))
            .unwrap_or_default())
    }

    fn count(&self, collection: &str, filter: &MasterFilter) -> StoreResult<usize> {
        self.check_query(collection)?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.count(filter))
            .unwrap_or(0))
    }

    fn upsert(&self, collection: &str, record: &Record) -> StoreResult<()> {
        self.check_write(&record.id)?;
        self.seed(collection, record.clone());
        Ok(())
    }

    fn insert(&self, collection: &str, record: &Record) -> StoreResult<RecordId> {
        self.check_write(&record.id)?;
        Ok(self
            .collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(record.clone()))
    }

    fn delete(&self, collection: &str, id: &RecordId) -> StoreResult<bool> {
        self.check_write(id)?;
        Ok(self.tombstone(collection, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergesync_model::Timestamp;

    fn connected() -> MemoryMasterStore {
        let store = MemoryMasterStore::new();
        store.connect(Duration::from_secs(1)).unwrap();
        store
    }

    #[test]
    fn calls_fail_until_connected() {
        let store = MemoryMasterStore::new();
        assert_eq!(
            store.find("c", &MasterFilter::active()),
            Err(StoreError::NotConnected)
        );
        store.connect(Duration::from_secs(1)).unwrap();
        assert_eq!(store.find("c", &MasterFilter::active()), Ok(vec![]));
    }

    #[test]
    fn delete_leaves_newer_tombstone() {
        let store = connected();
        store.seed(
            "c",
            Record::new(1).with("deleted", 0).with("updated_at", 5),
        );

        assert!(store.delete("c", &RecordId::Int(1)).unwrap());
        assert!(!store.delete("c", &RecordId::Int(2)).unwrap());

        let doc = store.get("c", &RecordId::Int(1)).unwrap();
        assert!(doc.is_deleted());
        assert!(doc.updated_at() > Some(Timestamp::from_millis(5)));
        assert_eq!(store.count("c", &MasterFilter::active()).unwrap(), 0);
    }

    #[test]
    fn latency_beyond_timeout_fails() {
        let store = connected();
        store.update_faults(|f| f.latency = Duration::from_secs(2));
        assert_eq!(
            store.count("c", &MasterFilter::active()),
            Err(StoreError::Timeout(Duration::from_secs(1)))
        );
    }

    #[test]
    fn latency_within_timeout_delays_the_call() {
        let store = connected();
        store.update_faults(|f| f.latency = Duration::from_millis(20));
        let started = std::time::Instant::now();
        assert_eq!(store.count("c", &MasterFilter::active()), Ok(0));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn insert_keeps_the_existing_document() {
        let store = connected();
        store.seed("c", Record::new(1).with("uuid", "a"));
        let id = store.insert("c", &Record::new(1).with("uuid", "b")).unwrap();
        assert_eq!(id, RecordId::Int(2));
        assert_eq!(store.get_by_uuid("c", "a").map(|d| d.id), Some(RecordId::Int(1)));
        assert_eq!(store.get_by_uuid("c", "b").map(|d| d.id), Some(RecordId::Int(2)));
    }

    #[test]
    fn injected_write_failure_is_per_id() {
        let store = connected();
        store.update_faults(|f| {
            f.failing_writes.insert(RecordId::Int(2));
        });
        assert!(store.upsert("c", &Record::new(1)).is_ok());
        assert!(matches!(
            store.upsert("c", &Record::new(2)),
            Err(StoreError::Constraint(_))
        ));
    }

    #[test]
    fn refused_connection() {
        let store = MemoryMasterStore::new();
        store.update_faults(|f| f.refuse_connections = true);
        assert_eq!(
            store.connect(Duration::from_secs(1)),
            Err(StoreError::NotConnected)
        );
        assert!(!store.is_connected());
    }
}

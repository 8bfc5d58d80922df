//! State shared by every step of one sync cycle.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use mergesync_model::{
    Clock, ConflictPolicy, EntityRegistry, LocalStore, MasterFilter, MasterStore, MetaStore,
    Record, RecordId, StoreError, StoreResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The master-store connection held for one cycle.
///
/// Every call reconnects once if the store reports it is no longer
/// connected.
pub struct MasterConnection<'a> {
    store: &'a dyn MasterStore,
    timeout: Duration,
    retry: &'a RetryConfig,
}

impl<'a> MasterConnection<'a> {
    /// Wraps a master store.
    pub fn new(store: &'a dyn MasterStore, timeout: Duration, retry: &'a RetryConfig) -> Self {
        Self {
            store,
            timeout,
            retry,
        }
    }

    /// Connects if the store is not already connected.
    pub fn ensure_connected(&self) -> SyncResult<()> {
        if self.store.is_connected() {
            return Ok(());
        }
        self.connect()
    }

    /// Opens the connection, retrying with backoff.
    pub fn connect(&self) -> SyncResult<()> {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                std::thread::sleep(self.retry.delay_for_attempt(attempt));
            }
            match self.store.connect(self.timeout) {
                Ok(()) => {
                    info!(attempt, "connected to master store");
                    return Ok(());
                }
                Err(e) => warn!(attempt, error = %e, "master connect failed"),
            }
        }
        Err(SyncError::NotConnected)
    }

    fn call<T>(&self, op: &str, f: impl Fn() -> StoreResult<T>) -> SyncResult<T> {
        match f() {
            Err(StoreError::NotConnected) => {
                warn!(op, "master connection lost, reconnecting");
                self.connect()?;
                f().map_err(SyncError::from)
            }
            other => other.map_err(SyncError::from),
        }
    }

    /// Finds documents.
    pub fn find(&self, collection: &str, filter: &MasterFilter) -> SyncResult<Vec<Record>> {
        self.call("find", || self.store.find(collection, filter))
    }

    /// Finds at most one document.
    pub fn find_one(&self, collection: &str, filter: MasterFilter) -> SyncResult<Option<Record>> {
        let filter = filter.with_limit(1);
        Ok(self.find(collection, &filter)?.into_iter().next())
    }

    /// Counts documents.
    pub fn count(&self, collection: &str, filter: &MasterFilter) -> SyncResult<usize> {
        self.call("count", || self.store.count(collection, filter))
    }

    /// Inserts or replaces a document.
    pub fn upsert(&self, collection: &str, record: &Record) -> SyncResult<()> {
        self.call("upsert", || self.store.upsert(collection, record))
    }

    /// Inserts a new document, letting the store pick a free id if the
    /// record's own is taken. Returns the id used.
    pub fn insert(&self, collection: &str, record: &Record) -> SyncResult<RecordId> {
        self.call("insert", || self.store.insert(collection, record))
    }

    /// Tombstones a document.
    pub fn delete(&self, collection: &str, id: &RecordId) -> SyncResult<bool> {
        self.call("delete", || self.store.delete(collection, id))
    }

    /// Returns true if the store reports a usable connection.
    pub fn is_connected(&self) -> bool {
        self.store.is_connected()
    }
}

/// Everything a cycle step needs, passed explicitly instead of held globally.
pub struct CycleContext<'a> {
    /// Engine configuration.
    pub config: &'a SyncConfig,
    /// Registered entity types.
    pub registry: &'a EntityRegistry,
    /// Local store.
    pub local: &'a dyn LocalStore,
    /// Local key/value store.
    pub meta: &'a dyn MetaStore,
    /// Master connection.
    pub master: MasterConnection<'a>,
    /// Conflict policy in force for this cycle.
    pub policy: ConflictPolicy,
    /// This device's id, stamped on pushed records.
    pub device_id: String,
    /// Source of `updated_at` stamps and watermarks.
    pub clock: &'a dyn Clock,
    /// Instant after which remaining work fails with `DeadlineExceeded`.
    pub deadline: Option<Instant>,
    cancelled: &'a AtomicBool,
}

impl<'a> CycleContext<'a> {
    /// Assembles a context.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a SyncConfig,
        registry: &'a EntityRegistry,
        local: &'a dyn LocalStore,
        meta: &'a dyn MetaStore,
        master: MasterConnection<'a>,
        policy: ConflictPolicy,
        device_id: String,
        clock: &'a dyn Clock,
        cancelled: &'a AtomicBool,
    ) -> Self {
        let deadline = config.cycle_deadline.map(|d| Instant::now() + d);
        Self {
            config,
            registry,
            local,
            meta,
            master,
            policy,
            device_id,
            clock,
            deadline,
            cancelled,
        }
    }

    /// Fails once the cycle deadline has passed.
    pub fn check_deadline(&self) -> SyncResult<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                debug!("cycle deadline exceeded");
                Err(SyncError::DeadlineExceeded)
            }
            _ => Ok(()),
        }
    }

    /// Fails if the cycle was cancelled.
    pub fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

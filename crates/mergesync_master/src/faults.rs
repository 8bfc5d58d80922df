//! Fault injection for exercising the engine's error paths.

use mergesync_model::RecordId;
use std::collections::HashSet;
use std::time::Duration;

/// Failures a `MemoryMasterStore` should simulate.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Simulated latency of every call. Calls within the connection's request
    /// timeout sleep for it; a call whose latency exceeds the timeout fails
    /// with `StoreError::Timeout` without sleeping.
    pub latency: Duration,
    /// Collections whose `find` and `count` fail.
    pub failing_collections: HashSet<String>,
    /// Document ids whose writes fail.
    pub failing_writes: HashSet<RecordId>,
    /// Refuse `connect`.
    pub refuse_connections: bool,
}

impl Faults {
    /// No faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns true if writes to this id should fail.
    pub fn write_fails(&self, id: &RecordId) -> bool {
        self.failing_writes.contains(id)
    }

    /// Returns true if queries on this collection should fail.
    pub fn query_fails(&self, collection: &str) -> bool {
        self.failing_collections.contains(collection)
    }
}

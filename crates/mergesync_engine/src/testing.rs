//! Shared setup for unit tests.

use crate::config::SyncConfig;
use crate::context::{CycleContext, MasterConnection};
use crate::memory::MemoryLocalStore;
use mergesync_master::MemoryMasterStore;
use mergesync_model::{EntityRegistry, MasterStore};
use mergesync_testkit::{crm_registry, ManualClock};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Harness {
    pub config: SyncConfig,
    pub registry: EntityRegistry,
    pub local: MemoryLocalStore,
    pub master: MemoryMasterStore,
    pub clock: Arc<ManualClock>,
    cancelled: AtomicBool,
}

impl Harness {
    /// CRM tables on both sides, master connected, shared manual clock.
    pub fn crm() -> Self {
        let clock = Arc::new(ManualClock::default());
        let registry = crm_registry();
        let local = MemoryLocalStore::new();
        for d in registry.ordered() {
            local.create_table(&d.local_table);
        }
        let master = MemoryMasterStore::with_clock(clock.clone());
        let config = SyncConfig::default().with_request_timeout(Duration::from_secs(1));
        if let Err(e) = master.connect(config.request_timeout) {
            panic!("connect failed: {e}");
        }
        Self {
            config,
            registry,
            local,
            master,
            clock,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn ctx(&self) -> CycleContext<'_> {
        CycleContext::new(
            &self.config,
            &self.registry,
            &self.local,
            &self.local,
            MasterConnection::new(&self.master, self.config.request_timeout, &self.config.retry),
            self.config.conflict_policy,
            "device-a".into(),
            &*self.clock,
            &self.cancelled,
        )
    }
}

//! Full-cycle sequencing across entity types.

use crate::config::{RetryConfig, SyncConfig};
use crate::context::{CycleContext, MasterConnection};
use crate::device::DeviceIdentity;
use crate::driver::EntityDriver;
use crate::error::{SyncError, SyncResult};
use crate::orphan::detect_orphans;
use crate::report::{EntityStatus, SyncCycleResult, SyncStage, SyncStatus};
use crate::schema::ensure_sync_support;
use crate::state::{SyncPhase, SyncStats};
use crate::watermark::SyncStateStore;
use mergesync_model::{
    Clock, ConflictPolicy, EntityRegistry, LocalPredicate, LocalStore, MasterFilter, MasterStore,
    MetaStore, SystemClock,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Which steps an operation runs.
#[derive(Debug, Clone, Copy)]
struct Steps {
    schema: bool,
    pull: bool,
    orphans: bool,
    push: bool,
}

/// Drives merge replication between a local store and the master store.
///
/// Entity types are processed one at a time in the registry's dependency
/// order. A failure in one type is recorded in the result and the next type
/// proceeds; failing to connect at the start aborts the operation. Only one
/// operation runs at a time.
///
/// # Example
///
/// ```
/// use mergesync_engine::{MemoryLocalStore, SyncConfig, SyncOrchestrator};
/// use mergesync_master::MemoryMasterStore;
/// use mergesync_model::{EntityDescriptor, EntityRegistry, Record};
/// use std::sync::Arc;
///
/// let registry = EntityRegistry::new(vec![EntityDescriptor::new("customers")]).unwrap();
/// let local = Arc::new(MemoryLocalStore::new());
/// local.create_table("customers");
/// local.app_put("customers", Record::new(1).with("uuid", "c1").with("name", "Ada"));
///
/// let master = Arc::new(MemoryMasterStore::new());
/// let engine = SyncOrchestrator::new(SyncConfig::default(), registry, local, master.clone());
///
/// let result = engine.perform_full_merge_sync().unwrap();
/// assert!(result.success);
/// assert_eq!(result.total_pushed, 1);
/// assert!(master.get_by_uuid("customers", "c1").is_some());
/// ```
pub struct SyncOrchestrator<L, M>
where
    L: LocalStore + MetaStore,
    M: MasterStore,
{
    config: SyncConfig,
    registry: EntityRegistry,
    local: Arc<L>,
    master: Arc<M>,
    clock: Arc<dyn Clock>,
    device: DeviceIdentity,
    phase: RwLock<SyncPhase>,
    stats: RwLock<SyncStats>,
    conflict_policy: RwLock<ConflictPolicy>,
    cancelled: AtomicBool,
}

impl<L, M> SyncOrchestrator<L, M>
where
    L: LocalStore + MetaStore,
    M: MasterStore,
{
    /// Creates an orchestrator using wall-clock time.
    pub fn new(config: SyncConfig, registry: EntityRegistry, local: Arc<L>, master: Arc<M>) -> Self {
        Self::with_clock(config, registry, local, master, Arc::new(SystemClock))
    }

    /// Creates an orchestrator with a custom clock for stamps and watermarks.
    pub fn with_clock(
        config: SyncConfig,
        registry: EntityRegistry,
        local: Arc<L>,
        master: Arc<M>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = config.conflict_policy;
        Self {
            config,
            registry,
            local,
            master,
            clock,
            device: DeviceIdentity::new(),
            phase: RwLock::new(SyncPhase::Idle),
            stats: RwLock::new(SyncStats::default()),
            conflict_policy: RwLock::new(policy),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Gets the current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Gets the lifetime statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns this device's id, creating and persisting it if needed.
    pub fn device_id(&self) -> String {
        self.device.ensure(self.local.as_ref())
    }

    /// Sets the conflict policy used by later operations.
    pub fn set_conflict_strategy(&self, policy: ConflictPolicy) {
        info!(%policy, "conflict policy changed");
        *self.conflict_policy.write() = policy;
    }

    /// Gets the conflict policy.
    pub fn conflict_strategy(&self) -> ConflictPolicy {
        *self.conflict_policy.read()
    }

    /// Requests that the running operation stop at the next entity boundary.
    ///
    /// A request made while idle stops the next operation at its first
    /// boundary. Every operation consumes the request when it ends, however
    /// it ends.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Runs schema support, pulls, orphan detection and pushes for every
    /// entity type.
    pub fn perform_full_merge_sync(&self) -> SyncResult<SyncCycleResult> {
        self.run(Steps {
            schema: self.config.ensure_schema,
            pull: true,
            orphans: self.config.detect_orphans,
            push: true,
        })
    }

    /// Pulls every entity type.
    pub fn pull_from_master(&self) -> SyncResult<SyncCycleResult> {
        self.run(Steps {
            schema: false,
            pull: true,
            orphans: false,
            push: false,
        })
    }

    /// Pushes every entity type.
    pub fn push_to_master(&self) -> SyncResult<SyncCycleResult> {
        self.run(Steps {
            schema: false,
            pull: false,
            orphans: false,
            push: true,
        })
    }

    /// Runs orphan detection for every entity type.
    pub fn detect_and_clean_orphans(&self) -> SyncResult<SyncCycleResult> {
        self.run(Steps {
            schema: false,
            pull: false,
            orphans: true,
            push: false,
        })
    }

    /// Gathers per-type counts, watermarks and connection health.
    ///
    /// Never fails: unreadable figures are reported per type.
    pub fn sync_status(&self) -> SyncStatus {
        let device_id = self.device_id();
        let no_retry = RetryConfig::no_retry();
        let master = MasterConnection::new(
            self.master.as_ref(),
            self.config.request_timeout,
            &no_retry,
        );
        let connected = master.ensure_connected().is_ok();
        let state = SyncStateStore::new(self.local.as_ref());

        let mut entities = Vec::with_capacity(self.registry.len());
        for descriptor in self.registry.ordered() {
            let table = &descriptor.local_table;
            let mut error = None;

            let local_total = or_note(self.local.count(table, &LocalPredicate::All), &mut error);
            let local_active =
                or_note(self.local.count(table, &LocalPredicate::Active), &mut error);
            let unsynced =
                or_note(self.local.count(table, &LocalPredicate::PendingPush), &mut error);
            let last_sync = or_note(state.get_last_sync_time(&descriptor.name), &mut error);
            let remote_active = if connected {
                match master.count(&descriptor.remote_collection, &MasterFilter::active()) {
                    Ok(n) => Some(n),
                    Err(e) => {
                        error.get_or_insert_with(|| e.to_string());
                        None
                    }
                }
            } else {
                None
            };

            entities.push(EntityStatus {
                entity: descriptor.name.clone(),
                local_total,
                local_active,
                unsynced,
                remote_active,
                last_sync,
                error,
            });
        }

        let phase = self.phase();
        let healthy =
            connected && phase != SyncPhase::Error && entities.iter().all(|e| e.error.is_none());

        SyncStatus {
            device_id,
            connected,
            healthy,
            phase,
            conflict_policy: self.conflict_strategy(),
            entities,
            last_error: self.stats.read().last_error.clone(),
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }

    /// Claims the engine for one operation.
    fn begin(&self) -> SyncResult<()> {
        let mut phase = self.phase.write();
        if !phase.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: phase.to_string(),
                to: SyncPhase::Connecting.to_string(),
            });
        }
        *phase = SyncPhase::Connecting;
        Ok(())
    }

    fn run(&self, steps: Steps) -> SyncResult<SyncCycleResult> {
        self.begin()?;
        let start = Instant::now();

        let outcome = self.run_steps(steps, start);
        self.cancelled.store(false, Ordering::SeqCst);
        match outcome {
            Ok(result) => {
                self.set_phase(SyncPhase::Synced);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.records_pulled += result.total_pulled as u64;
                stats.records_pushed += result.total_pushed as u64;
                stats.conflicts_resolved += result.total_conflicts as u64;
                stats.orphans_removed += result.total_orphans_removed as u64;
                stats.last_sync_time = Some(self.clock.now());
                stats.last_error = None;
                info!(
                    pulled = result.total_pulled,
                    pushed = result.total_pushed,
                    orphans = result.total_orphans_removed,
                    conflicts = result.total_conflicts,
                    errors = result.errors.len(),
                    duration_ms = result.duration.as_millis() as u64,
                    "sync complete"
                );
                Ok(result)
            }
            Err(e) => {
                error!(error = %e, "sync aborted");
                self.set_phase(SyncPhase::Error);
                self.stats.write().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn run_steps(&self, steps: Steps, start: Instant) -> SyncResult<SyncCycleResult> {
        let device_id = self.device_id();
        let master = MasterConnection::new(
            self.master.as_ref(),
            self.config.request_timeout,
            &self.config.retry,
        );
        master.ensure_connected()?;

        let ctx = CycleContext::new(
            &self.config,
            &self.registry,
            self.local.as_ref(),
            self.local.as_ref(),
            master,
            self.conflict_strategy(),
            device_id.clone(),
            self.clock.as_ref(),
            &self.cancelled,
        );
        let mut result = SyncCycleResult::new(device_id);

        if steps.schema {
            for descriptor in self.registry.ordered() {
                if let Err(e) = ensure_sync_support(ctx.local, descriptor) {
                    warn!(entity = %descriptor.name, error = %e, "schema step failed");
                    result.add_error(&descriptor.name, SyncStage::Schema, &e);
                }
            }
        }

        if steps.pull {
            self.set_phase(SyncPhase::Pulling);
            for descriptor in self.registry.ordered() {
                ctx.check_cancelled()?;
                let outcome = ctx
                    .check_deadline()
                    .and_then(|_| EntityDriver::new(&ctx, descriptor).pull());
                match outcome {
                    Ok(report) => result.add_pull(&descriptor.name, report),
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(e) => {
                        warn!(entity = %descriptor.name, error = %e, "pull failed");
                        result.add_error(&descriptor.name, SyncStage::Pull, &e);
                    }
                }
            }
        }

        if steps.orphans {
            self.set_phase(SyncPhase::DetectingOrphans);
            for descriptor in self.registry.ordered() {
                ctx.check_cancelled()?;
                // a type whose pull failed may be missing records the master holds
                if result
                    .errors
                    .iter()
                    .any(|e| e.entity == descriptor.name && e.stage == SyncStage::Pull)
                {
                    continue;
                }
                let outcome = ctx
                    .check_deadline()
                    .and_then(|_| detect_orphans(&ctx, descriptor));
                match outcome {
                    Ok(report) => result.add_orphans(&descriptor.name, report),
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(e) => {
                        warn!(entity = %descriptor.name, error = %e, "orphan detection failed");
                        result.add_error(&descriptor.name, SyncStage::Orphans, &e);
                    }
                }
            }
        }

        if steps.push {
            self.set_phase(SyncPhase::Pushing);
            for descriptor in self.registry.ordered() {
                ctx.check_cancelled()?;
                let outcome = ctx
                    .check_deadline()
                    .and_then(|_| EntityDriver::new(&ctx, descriptor).push());
                match outcome {
                    Ok(report) => result.add_push(&descriptor.name, report),
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(e) => {
                        warn!(entity = %descriptor.name, error = %e, "push failed");
                        result.add_error(&descriptor.name, SyncStage::Push, &e);
                    }
                }
            }
        }

        result.finish(start.elapsed());
        Ok(result)
    }
}

/// Unwraps a status figure, keeping the first error message.
fn or_note<T: Default, E: Into<SyncError>>(result: Result<T, E>, error: &mut Option<String>) -> T {
    result.unwrap_or_else(|e| {
        let e = e.into();
        error.get_or_insert_with(|| e.to_string());
        T::default()
    })
}

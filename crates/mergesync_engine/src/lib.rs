//! # mergesync engine
//!
//! Merge replication between a device's local store and a central master store.
//!
//! This crate provides:
//! - Sync orchestrator (idle → connecting → pulling → detecting orphans → pushing → synced)
//! - Per-entity pull and push with conflict resolution
//! - Cross-store foreign-key translation through `uuid`
//! - Cascade deletes along declared parent → child rules
//! - Orphan detection
//! - Per-entity watermarks and a persisted device identity
//! - Reconnect with exponential backoff
//! - An in-memory local store
//!
//! ## Architecture
//!
//! A full cycle runs, for every registered entity type in dependency order:
//! 1. Pull master changes since the type's watermark
//! 2. Remove local records the master no longer holds
//! 3. Push pending local changes
//!
//! Entity types are processed sequentially so a parent's records exist on
//! the destination side before the children referencing them arrive.
//!
//! ## Key Invariants
//!
//! - Deletions travel as tombstones and are purged once consumed
//! - Every conflict resolution is reported, never applied silently
//! - A failing record never aborts its entity type; a failing type never aborts the cycle
//! - Watermarks only move forward, and only after a clean pull
//! - Every local write the engine makes is a single atomic store call

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cascade;
mod config;
mod context;
mod device;
mod driver;
mod error;
mod identity;
mod memory;
mod orchestrator;
mod orphan;
mod report;
mod schema;
mod state;
mod watermark;

#[cfg(test)]
mod testing;

pub use cascade::{cascade_delete, CascadeReport};
pub use config::{RetryConfig, SyncConfig};
pub use context::{CycleContext, MasterConnection};
pub use device::{generate_device_id, DeviceIdentity, DEVICE_ID_KEY};
pub use driver::{EntityDriver, PullReport, PushReport};
pub use error::{SyncError, SyncResult};
pub use identity::IdentityResolver;
pub use memory::MemoryLocalStore;
pub use orchestrator::SyncOrchestrator;
pub use orphan::{detect_orphans, OrphanReport};
pub use report::{EntityError, EntityStatus, SyncCycleResult, SyncStage, SyncStatus};
pub use schema::{ensure_sync_support, SchemaReport};
pub use state::{SyncPhase, SyncStats};
pub use watermark::SyncStateStore;

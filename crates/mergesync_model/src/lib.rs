//! # mergesync model
//!
//! Pure types shared by every mergesync crate.
//!
//! This crate provides:
//! - `Record` and its four sync-control fields (`uuid`, `synced`, `device_id`, `deleted`)
//! - `RecordId` and `Timestamp` value types
//! - `EntityDescriptor` / `EntityRegistry` with cascade rules and dependency order
//! - The conflict resolver (`resolve_conflict`) and `ConflictOutcome`
//! - The store interfaces consumed by the engine (`LocalStore`, `MasterStore`, `MetaStore`)
//!
//! This crate performs no I/O of its own.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod conflict;
mod descriptor;
mod error;
mod record;
mod store;
mod timestamp;

pub use clock::{Clock, SystemClock};
pub use conflict::{
    resolve_conflict, ConflictDecision, ConflictOutcome, ConflictPolicy, ConflictReason, Winner,
};
pub use descriptor::{CascadeRule, EntityDescriptor, EntityRegistry, ReferenceField};
pub use error::{ModelError, ModelResult};
pub use record::{fields, Record, RecordId};
pub use store::{
    LocalPredicate, LocalStore, MasterFilter, MasterStore, MetaStore, StoreError, StoreResult,
};
pub use timestamp::Timestamp;

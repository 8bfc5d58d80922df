//! # mergesync master
//!
//! In-memory reference implementation of the central store.
//!
//! This crate provides:
//! - `MemoryMasterStore`, a `MasterStore` over in-memory document collections
//! - Logical deletes (tombstones with a fresh `updated_at`)
//! - Fault injection for tests: disconnects, slow calls, failing writes and queries
//!
//! Production deployments put a real database behind the `MasterStore`
//! trait; this implementation defines the semantics the engine relies on.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod collection;
mod faults;
mod store;

pub use faults::Faults;
pub use store::MemoryMasterStore;

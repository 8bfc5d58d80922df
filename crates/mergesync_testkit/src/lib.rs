//! # mergesync testkit
//!
//! Test utilities for mergesync.
//!
//! This crate provides:
//! - A deterministic `ManualClock`
//! - Fixture registries and record builders (customers, sessions, notes)
//! - proptest strategies for records and conflict policies
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mergesync_testkit::prelude::*;
//!
//! let clock = ManualClock::starting_at(1_000);
//! let registry = crm_registry();
//! let customer = customer(1, "c1", "Ada").stamped(clock.tick());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use clock::*;
pub use fixtures::*;

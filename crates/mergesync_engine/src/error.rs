//! Error types for the sync engine.

use mergesync_model::{ModelError, StoreError};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The master store could not be reached.
    #[error("not connected to master store")]
    NotConnected,

    /// A master call exceeded its time bound.
    #[error("master call timed out after {0:?}")]
    Timeout(Duration),

    /// The cycle deadline elapsed.
    #[error("sync cycle deadline exceeded")]
    DeadlineExceeded,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A store reported an error.
    #[error("store error: {0}")]
    Store(StoreError),

    /// The entity registry is invalid or incomplete.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NotConnected | SyncError::Timeout(_) | SyncError::DeadlineExceeded
        )
    }

    /// Returns true if this error ends the current entity type's phase
    /// rather than just the record being processed.
    pub fn aborts_entity(&self) -> bool {
        self.is_retryable() || matches!(self, SyncError::Cancelled)
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotConnected => SyncError::NotConnected,
            StoreError::Timeout(after) => SyncError::Timeout(after),
            other => SyncError::Store(other),
        }
    }
}

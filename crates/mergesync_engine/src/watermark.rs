//! Per-entity pull watermarks.

use mergesync_model::{MetaStore, StoreResult, Timestamp};
use tracing::warn;

const KEY_PREFIX: &str = "last_sync:";

/// Reads and advances `last_sync_timestamp` per entity type.
///
/// Backed by the local key/value table. A missing table or key reads as
/// "never synced".
pub struct SyncStateStore<'a> {
    meta: &'a dyn MetaStore,
}

impl<'a> SyncStateStore<'a> {
    /// Wraps a key/value store.
    pub fn new(meta: &'a dyn MetaStore) -> Self {
        Self { meta }
    }

    /// Returns the last successful pull time, or `None` if never synced.
    pub fn get_last_sync_time(&self, entity: &str) -> StoreResult<Option<Timestamp>> {
        let raw = self.meta.get_meta(&key(entity))?;
        Ok(raw.and_then(|text| {
            let parsed = Timestamp::parse(&text);
            if parsed.is_none() {
                warn!(entity, value = %text, "unreadable sync watermark, treating as never synced");
            }
            parsed
        }))
    }

    /// Stores a pull time unconditionally.
    pub fn set_last_sync_time(&self, entity: &str, at: Timestamp) -> StoreResult<()> {
        self.meta.set_meta(&key(entity), &at.to_string())
    }

    /// Stores a pull time only if it is later than the current one.
    /// Returns true if the watermark moved.
    pub fn advance(&self, entity: &str, at: Timestamp) -> StoreResult<bool> {
        match self.get_last_sync_time(entity)? {
            Some(current) if current >= at => Ok(false),
            _ => {
                self.set_last_sync_time(entity, at)?;
                Ok(true)
            }
        }
    }
}

fn key(entity: &str) -> String {
    format!("{KEY_PREFIX}{entity}")
}

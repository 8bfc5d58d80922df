//! Stable per-device identity.

use mergesync_model::{MetaStore, Timestamp};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

/// Key under which the device id is persisted.
pub const DEVICE_ID_KEY: &str = "device_id";

/// Generates and caches this device's identifier.
///
/// The id is read from the key/value store, or generated (host name +
/// timestamp + random suffix) and persisted on first use. It is cached for
/// the lifetime of the value, so one process reuses the same id even if
/// persisting failed.
#[derive(Debug, Default)]
pub struct DeviceIdentity {
    cached: Mutex<Option<String>>,
}

impl DeviceIdentity {
    /// Creates an identity that has not been loaded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the persisted id, creating and persisting one if absent.
    ///
    /// Never fails: if the store cannot be read or written, an in-memory id
    /// is used and a warning is logged.
    pub fn ensure(&self, meta: &dyn MetaStore) -> String {
        let mut cached = self.cached.lock();
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }

        let id = match meta.get_meta(DEVICE_ID_KEY) {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => {
                let id = generate_device_id();
                match meta.set_meta(DEVICE_ID_KEY, &id) {
                    Ok(()) => info!(device_id = %id, "generated device id"),
                    Err(e) => {
                        warn!(device_id = %id, error = %e, "could not persist device id, using in-memory id")
                    }
                }
                id
            }
            Err(e) => {
                let id = generate_device_id();
                warn!(device_id = %id, error = %e, "could not read device id, using in-memory id");
                id
            }
        };

        *cached = Some(id.clone());
        id
    }

    /// Returns the id if it has been loaded.
    pub fn current(&self) -> Option<String> {
        self.cached.lock().clone()
    }
}

/// Builds a fresh device id: `<host>-<millis>-<suffix>`.
pub fn generate_device_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| sanitize_host(&h))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "device".to_string());

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();

    format!(
        "{host}-{}-{}",
        Timestamp::now().as_millis(),
        suffix.to_ascii_lowercase()
    )
}

fn sanitize_host(host: &str) -> String {
    host.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

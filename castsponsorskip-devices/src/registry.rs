use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

/// Tracks which device UUIDs currently have an active watcher.
///
/// The registry guarantees at most one watcher per endpoint identity: a second
/// [DeviceRegistry::register] call for the same UUID fails until the token of the first
/// call has been dropped. The lock is never held across a suspension point.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<Mutex<HashSet<String>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the given device UUID.
    ///
    /// Returns `None` when the device is already being watched. Dropping the returned
    /// token releases the claim.
    pub fn register(&self, uuid: impl Into<String>) -> Option<RegistryToken> {
        let uuid = uuid.into();
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());

        if devices.insert(uuid.clone()) {
            Some(RegistryToken {
                uuid,
                devices: Arc::downgrade(&self.devices),
            })
        } else {
            None
        }
    }

    /// Returns true when the given device UUID is currently being watched.
    pub fn contains(&self, uuid: &str) -> bool {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(uuid)
    }

    /// The number of devices currently being watched.
    pub fn len(&self) -> usize {
        self.devices.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the registry claim of a device when dropped.
#[derive(Debug)]
pub struct RegistryToken {
    uuid: String,
    devices: Weak<Mutex<HashSet<String>>>,
}

impl RegistryToken {
    /// The device UUID held by this token.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

impl Drop for RegistryToken {
    fn drop(&mut self) {
        if let Some(devices) = self.devices.upgrade() {
            devices
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.uuid);
        }
    }
}

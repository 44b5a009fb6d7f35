//! Device registry and per-device locking.
//!
//! Records are stored as JSON under `devices/<name>`. Every
//! read-modify-write of a record must happen while holding the device's
//! [`DeviceGuard`]; the registry itself does not lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use u2f_core::{normalize_device_name, DeviceRecord};

use crate::storage::{get_json, put_json, Storage, StorageError};

const DEVICE_PREFIX: &str = "devices/";

fn device_key(name: &str) -> String {
    format!("{DEVICE_PREFIX}{name}")
}

/// Typed access to device records in a [`Storage`].
#[derive(Clone)]
pub struct DeviceRegistry {
    storage: Arc<dyn Storage>,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Load a device record. `name` must already be normalized.
    pub async fn get(&self, name: &str) -> Result<Option<DeviceRecord>, StorageError> {
        get_json(self.storage.as_ref(), &device_key(name)).await
    }

    pub async fn put(&self, record: &DeviceRecord) -> Result<(), StorageError> {
        put_json(self.storage.as_ref(), &device_key(&record.name), record).await
    }

    pub async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.storage.delete(&device_key(name)).await
    }

    /// Names of all stored devices.
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        self.storage.list(DEVICE_PREFIX).await
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("storage", &"<dyn Storage>")
            .finish()
    }
}

/// Table of per-device async mutexes keyed by normalized name.
///
/// Entries are created on first use and removed when the last guard for a
/// name is dropped, so the table only holds devices with work in flight.
#[derive(Clone, Default)]
pub struct DeviceLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &str) -> DeviceGuard {
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;

        DeviceGuard {
            guard: Some(guard),
            name: name.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of devices with a live lock entry.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

impl std::fmt::Debug for DeviceLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLocks")
            .field("active", &self.locks.len())
            .finish()
    }
}

/// Exclusive access to one device, released on drop.
pub struct DeviceGuard {
    guard: Option<OwnedMutexGuard<()>>,
    name: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl DeviceGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        // Release the mutex first so our own Arc no longer counts.
        drop(self.guard.take());
        // The table holds one reference; anyone waiting or holding adds another.
        self.locks
            .remove_if(&self.name, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Normalized alias for a device name, or `None` when it is empty.
pub fn device_alias(name: &str) -> Option<String> {
    normalize_device_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_registry_round_trip() {
        let registry = DeviceRegistry::new(Arc::new(MemoryStorage::new()));
        let mut record = DeviceRecord::new("Token1").unwrap();
        record.role_name = "ops".to_string();

        registry.put(&record).await.unwrap();
        assert_eq!(registry.get("token1").await.unwrap(), Some(record));
        assert_eq!(registry.list().await.unwrap(), vec!["token1"]);

        registry.delete("token1").await.unwrap();
        assert!(registry.get("token1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_surfaced() {
        let storage = Arc::new(MemoryStorage::new());
        storage.put("devices/broken", b"{not json".to_vec()).await.unwrap();
        let registry = DeviceRegistry::new(storage);

        let err = registry.get("broken").await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_lock_entries_are_pruned() {
        let locks = DeviceLocks::new();
        {
            let guard = locks.lock("token1").await;
            assert_eq!(guard.name(), "token1");
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_per_device() {
        let locks = DeviceLocks::new();
        let first = locks.lock("token1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("token1").await;
            })
        };

        // Another device is not blocked.
        let other = locks.lock("token2").await;
        drop(other);

        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap();
        assert_eq!(locks.active(), 0);
    }
}

//! Key-value storage collaborator
//!
//! The backend persists everything (device records, roles) as JSON values
//! under string keys through the [`Storage`] trait:
//! - `devices/<name>` - one [`u2f_core::DeviceRecord`] per device
//! - `roles/<name>` - one [`crate::roles::RoleRecord`] per role
//!
//! [`MemoryStorage`] is shipped for development and tests; production hosts
//! plug in their own implementation.

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;

/// Storage errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Storage operation failed: {0}")]
    Operation(String),

    #[error("Corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Async key-value store.
///
/// Implementations must be thread-safe (`Send + Sync`). Each call is
/// independent; callers serialize read-modify-write cycles themselves.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys under `prefix`, with the prefix stripped, in ascending order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Load and decode a JSON value.
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match storage.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Encode and store a JSON value.
pub(crate) async fn put_json<T: serde::Serialize>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes =
        serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    storage.put(key, bytes).await
}

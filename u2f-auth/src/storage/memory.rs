//! In-memory storage backend
//!
//! Values live in a [`DashMap`] and are lost on restart. Useful for
//! development and tests only.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Storage, StorageError};

#[derive(Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(prefix).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = MemoryStorage::new();
        assert!(storage.get("devices/a").await.unwrap().is_none());

        storage.put("devices/a", b"1".to_vec()).await.unwrap();
        assert_eq!(storage.get("devices/a").await.unwrap(), Some(b"1".to_vec()));

        storage.delete("devices/a").await.unwrap();
        storage.delete("devices/a").await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_list_strips_prefix_and_sorts() {
        let storage = MemoryStorage::new();
        storage.put("devices/b", Vec::new()).await.unwrap();
        storage.put("devices/a", Vec::new()).await.unwrap();
        storage.put("roles/a", Vec::new()).await.unwrap();

        assert_eq!(storage.list("devices/").await.unwrap(), vec!["a", "b"]);
        assert_eq!(storage.list("roles/").await.unwrap(), vec!["a"]);
    }
}

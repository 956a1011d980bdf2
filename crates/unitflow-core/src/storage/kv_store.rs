//! Key-value store trait.
//!
//! Defines the get/set collaborator the engine persists its state blob
//! through, plus a process-local implementation for embedding and tests.

use std::sync::Arc;

use dashmap::DashMap;
use unitflow_types::error::RepositoryError;

/// Trait for persistent JSON key-value storage.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// The SQLite implementation lives in unitflow-infra.
pub trait KvStore: Send + Sync {
    /// Get a value by key. Returns None if the key does not exist.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send;

    /// Set a value for a key (upsert).
    fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a key. No-op if key does not exist.
    fn delete(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all keys, sorted.
    fn list_keys(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}

/// Process-local `KvStore` backed by a concurrent map.
///
/// Clones share the same map, so a test can hand one clone to an engine and
/// inspect persisted state through another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKvStore {
    entries: Arc<DashMap<String, serde_json::Value>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, RepositoryError> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryKvStore::new();
        store.set("k", &json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = InMemoryKvStore::new();
        store.set("k", &json!(1)).await.unwrap();
        store.set("k", &json!(2)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_list_keys() {
        let store = InMemoryKvStore::new();
        store.set("b", &json!(1)).await.unwrap();
        store.set("a", &json!(2)).await.unwrap();
        assert_eq!(store.list_keys().await.unwrap(), vec!["a", "b"]);

        store.delete("a").await.unwrap();
        store.delete("never-existed").await.unwrap();
        assert_eq!(store.list_keys().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let store = InMemoryKvStore::new();
        let other = store.clone();
        store.set("k", &json!("v")).await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), Some(json!("v")));
    }
}

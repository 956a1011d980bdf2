//! `KvStore` over the `engine_kv_store` table.
//!
//! Each value is one JSON document in a TEXT column.

use chrono::Utc;
use sqlx::Row;
use unitflow_core::storage::KvStore;
use unitflow_types::error::RepositoryError;

use super::pool::DatabasePool;

/// Durable store for the engine state blob.
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: DatabasePool,
}

impl SqliteKvStore {
        pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM engine_kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let value_str: String = row
                    .try_get("value")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let value: serde_json::Value = serde_json::from_str(&value_str)
                    .map_err(|e| RepositoryError::Serialization(format!("invalid JSON value: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let value_str = serde_json::to_string(value)
            .map_err(|e| RepositoryError::Serialization(format!("failed to serialize value: {e}")))?;

        sqlx::query(
            r#"INSERT INTO engine_kv_store (key, value, created_at, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(&value_str)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM engine_kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT key FROM engine_kv_store ORDER BY key")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let key: String = row
                .try_get("key")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            keys.push(key);
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::database_url;
    use serde_json::json;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, SqliteKvStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url(dir.path())).await.unwrap();
        (dir, SqliteKvStore::new(pool))
    }

    #[tokio::test]
    async fn test_set_then_get_state_blob() {
        let (_dir, store) = test_store().await;

        let value = json!({"workflows": [], "active_workflows": []});
        store.set("workflow_engine", &value).await.unwrap();

        let got = store.get("workflow_engine").await.unwrap();
        assert_eq!(got, Some(value));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let (_dir, store) = test_store().await;
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_set_overwrites() {
        let (_dir, store) = test_store().await;

        store.set("counter", &json!(1)).await.unwrap();
        store.set("counter", &json!(2)).await.unwrap();

        assert_eq!(store.get("counter").await.unwrap(), Some(json!(2)));
        assert_eq!(store.list_keys().await.unwrap(), vec!["counter"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, store) = test_store().await;

        store.set("temp", &json!("value")).await.unwrap();
        store.delete("temp").await.unwrap();
        assert!(store.get("temp").await.unwrap().is_none());

        // Deleting again is a no-op
        store.delete("temp").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_keys_sorted() {
        let (_dir, store) = test_store().await;
        assert!(store.list_keys().await.unwrap().is_empty());

        store.set("beta", &json!("b")).await.unwrap();
        store.set("alpha", &json!("a")).await.unwrap();
        store.set("gamma", &json!("g")).await.unwrap();

        assert_eq!(store.list_keys().await.unwrap(), vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_serialization_error() {
        let (_dir, store) = test_store().await;
        sqlx::query(
            "INSERT INTO engine_kv_store (key, value, created_at, updated_at) VALUES ('bad', 'not json', '', '')",
        )
        .execute(&store.pool.writer)
        .await
        .unwrap();

        assert!(matches!(
            store.get("bad").await.unwrap_err(),
            RepositoryError::Serialization(_)
        ));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(dir.path());
        {
            let store = SqliteKvStore::new(DatabasePool::new(&url).await.unwrap());
            store.set("k", &json!({"nested": [1, "two", null]})).await.unwrap();
        }
        let store = SqliteKvStore::new(DatabasePool::new(&url).await.unwrap());
        assert_eq!(
            store.get("k").await.unwrap(),
            Some(json!({"nested": [1, "two", null]}))
        );
    }
}

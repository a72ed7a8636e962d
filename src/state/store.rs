//! Storage trait and the in-memory backend

use crate::error::SwapResult;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Named tables of opaque values keyed by string
///
/// Every mutation is a single-key operation; callers never need multi-key
/// transactions because each key belongs to exactly one platform/hash pair.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, table: &str, key: &str) -> SwapResult<Option<Vec<u8>>>;

    /// Insert or overwrite
    async fn set(&self, table: &str, key: &str, value: Vec<u8>) -> SwapResult<()>;

    /// First write wins; returns `false` when the key already exists
    async fn insert_if_absent(&self, table: &str, key: &str, value: Vec<u8>) -> SwapResult<bool>;

    /// Returns `true` when a value was removed
    async fn remove(&self, table: &str, key: &str) -> SwapResult<bool>;

    /// All entries of a table, in storage order
    async fn scan(&self, table: &str) -> SwapResult<Vec<(String, Vec<u8>)>>;

    async fn health_check(&self) -> SwapResult<()> {
        Ok(())
    }
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    table: &str,
    key: &str,
) -> SwapResult<Option<T>> {
    match store.get(table, key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    table: &str,
    key: &str,
    value: &T,
) -> SwapResult<()> {
    store.set(table, key, serde_json::to_vec(value)?).await
}

pub async fn insert_json_if_absent<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    table: &str,
    key: &str,
    value: &T,
) -> SwapResult<bool> {
    store
        .insert_if_absent(table, key, serde_json::to_vec(value)?)
        .await
}

/// In-memory backend, used by tests and `storage.backend = "memory"`
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, HashMap<String, Vec<u8>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, table: &str, key: &str) -> SwapResult<Option<Vec<u8>>> {
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn set(&self, table: &str, key: &str, value: Vec<u8>) -> SwapResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn insert_if_absent(&self, table: &str, key: &str, value: Vec<u8>) -> SwapResult<bool> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(table.to_string()).or_default();
        if table.contains_key(key) {
            return Ok(false);
        }
        table.insert(key.to_string(), value);
        Ok(true)
    }

    async fn remove(&self, table: &str, key: &str) -> SwapResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .get_mut(table)
            .map(|t| t.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn scan(&self, table: &str) -> SwapResult<Vec<(String, Vec<u8>)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

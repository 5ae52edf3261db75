//! The key-value storage contract used by `kv` data sources and
//! data-mutating actions.

use crate::error::StorageResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Summary numbers for a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_keys: usize,
    /// Sum of the serialized JSON length of every value.
    pub total_size_bytes: usize,
}

/// Abstract key-value store holding JSON values.
///
/// Only `get`, `set`, `delete` and `keys` are required; the bulk
/// operations have default implementations built on them that backends
/// may override with something cheaper.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend label for logs.
    fn backend_name(&self) -> &'static str;

    /// Returns the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Removes `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// All keys, sorted.
    async fn keys(&self) -> StorageResult<Vec<String>>;

    /// Every entry as one JSON object.
    async fn export(&self) -> StorageResult<Map<String, Value>> {
        let mut out = Map::new();
        for key in self.keys().await? {
            if let Some(value) = self.get(&key).await? {
                out.insert(key, value);
            }
        }
        Ok(out)
    }

    /// Writes every entry of `data`, overwriting existing keys. Returns the
    /// number of entries written.
    async fn import(&self, data: Map<String, Value>) -> StorageResult<usize> {
        let count = data.len();
        for (key, value) in data {
            self.set(&key, value).await?;
        }
        Ok(count)
    }

    /// Removes every entry.
    async fn clear(&self) -> StorageResult<()> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    async fn stats(&self) -> StorageResult<StoreStats> {
        let data = self.export().await?;
        let mut total_size_bytes = 0;
        for value in data.values() {
            total_size_bytes += serde_json::to_string(value)?.len();
        }
        Ok(StoreStats {
            total_keys: data.len(),
            total_size_bytes,
        })
    }
}

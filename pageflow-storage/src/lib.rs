//! Storage collaborators for pageflow.
//!
//! The engine reaches persisted state only through the [`KvStore`] trait.
//! Three backends ship here:
//!
//! - [`MemoryStore`]: in-process map, used by tests and ephemeral pages
//! - [`FileStore`]: a single JSON document on disk
//! - [`RemoteStore`]: the `/api/storage` REST backend

mod error;
mod file;
mod memory;
mod remote;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use remote::RemoteStore;
pub use store::{KvStore, StoreStats};

use serde_json::{Map, Value};
use tracing::debug;

/// Writes each `seed_data` entry whose key is not yet present in `store`.
///
/// Existing values are never overwritten. Returns the number of entries
/// written.
pub async fn seed(store: &dyn KvStore, seed_data: &Map<String, Value>) -> StorageResult<usize> {
    let mut written = 0;
    for (key, value) in seed_data {
        if store.get(key).await?.is_none() {
            store.set(key, value.clone()).await?;
            written += 1;
        }
    }
    debug!(backend = store.backend_name(), written, total = seed_data.len(), "seeded store");
    Ok(written)
}

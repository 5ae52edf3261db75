use crate::error::{StorageError, StorageResult};
use crate::store::KvStore;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Store persisted as a single JSON object on disk.
///
/// The whole document is loaded on open and rewritten after every
/// mutation. Writes go to a sibling temp file first and are renamed into
/// place, so a crash mid-write leaves the previous document intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Opens (or starts) the store at `path`. A missing file is an empty
    /// store; the file is created on the first write.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => map.into_iter().collect(),
                other => {
                    return Err(StorageError::InvalidData(format!(
                        "{} must contain a JSON object, found {}",
                        path.display(),
                        kind(&other)
                    )));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "opened file store");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `next` to disk and only then makes it the live document, so a
    /// failed write leaves reads unchanged.
    async fn commit(
        &self,
        entries: &mut BTreeMap<String, Value>,
        next: BTreeMap<String, Value>,
    ) -> StorageResult<()> {
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn persist(&self, entries: &BTreeMap<String, Value>) -> StorageResult<()> {
        let doc: Map<String, Value> = entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let bytes = serde_json::to_vec_pretty(&Value::Object(doc))?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl KvStore for FileStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.commit(&mut entries, next).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            return Ok(false);
        }
        let mut next = entries.clone();
        next.remove(key);
        self.commit(&mut entries, next).await?;
        Ok(true)
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn import(&self, data: Map<String, Value>) -> StorageResult<usize> {
        let count = data.len();
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        next.extend(data);
        self.commit(&mut entries, next).await?;
        Ok(count)
    }

    async fn clear(&self) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        self.commit(&mut entries, BTreeMap::new()).await
    }
}

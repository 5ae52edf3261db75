//! Client for the REST storage backend.
//!
//! Routes, relative to the base URL:
//!
//! | call | route |
//! |------|-------|
//! | get | `GET /api/storage/<key>` → `{"value": ..}`, 404 when absent |
//! | set | `PUT /api/storage/<key>` with `{"value": ..}` |
//! | delete | `DELETE /api/storage/<key>`, 404 when absent |
//! | keys | `GET /api/storage/keys` → `{"keys": [..]}` |
//! | export | `GET /api/storage/export` → object of all entries |
//! | import | `POST /api/storage/import` → `{"imported": n}` |
//! | clear | `POST /api/storage/clear` |
//! | stats | `GET /api/storage/stats` |

use crate::error::{StorageError, StorageResult};
use crate::store::{KvStore, StoreStats};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ValueBody {
    value: Value,
}

#[derive(Debug, Deserialize)]
struct KeysBody {
    keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ImportBody {
    imported: usize,
}

/// [`KvStore`] backed by a remote storage service.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    client: Client,
    base_url: Url,
}

impl RemoteStore {
    /// Creates a store talking to `base_url` (e.g. `http://localhost:5001`).
    pub fn new(base_url: &str) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StorageError::Network(format!("failed to create HTTP client: {e}")))?;
        Self::with_client(client, base_url)
    }

    /// Uses a preconfigured client (timeouts, headers).
    pub fn with_client(client: Client, base_url: &str) -> StorageResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StorageError::InvalidData(format!("invalid base url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StorageError::InvalidData(format!(
                "'{base_url}' cannot be used as a base url"
            )));
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `<base>/api/storage/<segment>`, with `segment` percent-encoded.
    fn url(&self, segment: &str) -> StorageResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| StorageError::InvalidData("base url cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(["api", "storage", segment]);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> StorageResult<Response> {
        request
            .send()
            .await
            .map_err(|e| StorageError::Network(format!("{what} failed: {e}")))
    }

    async fn check(response: Response, what: &str) -> StorageResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StorageError::Status {
            status: status.as_u16(),
            message: format!("{what}: {message}"),
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response, what: &str) -> StorageResult<T> {
        response
            .json()
            .await
            .map_err(|e| StorageError::InvalidData(format!("failed to parse {what} response: {e}")))
    }
}

#[async_trait]
impl KvStore for RemoteStore {
    fn backend_name(&self) -> &'static str {
        "remote"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let response = self.send(self.client.get(self.url(key)?), "get").await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(key, "remote key absent");
            return Ok(None);
        }
        let response = Self::check(response, "get").await?;
        let body: ValueBody = Self::json(response, "get").await?;
        Ok(Some(body.value))
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let request = self.client.put(self.url(key)?).json(&json!({ "value": value }));
        let response = self.send(request, "set").await?;
        Self::check(response, "set").await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let response = self.send(self.client.delete(self.url(key)?), "delete").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response, "delete").await?;
        Ok(true)
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let response = self.send(self.client.get(self.url("keys")?), "keys").await?;
        let response = Self::check(response, "keys").await?;
        let mut body: KeysBody = Self::json(response, "keys").await?;
        body.keys.sort();
        Ok(body.keys)
    }

    async fn export(&self) -> StorageResult<Map<String, Value>> {
        let response = self.send(self.client.get(self.url("export")?), "export").await?;
        let response = Self::check(response, "export").await?;
        Self::json(response, "export").await
    }

    async fn import(&self, data: Map<String, Value>) -> StorageResult<usize> {
        let request = self.client.post(self.url("import")?).json(&data);
        let response = self.send(request, "import").await?;
        let response = Self::check(response, "import").await?;
        let body: ImportBody = Self::json(response, "import").await?;
        Ok(body.imported)
    }

    async fn clear(&self) -> StorageResult<()> {
        let response = self.send(self.client.post(self.url("clear")?), "clear").await?;
        Self::check(response, "clear").await?;
        Ok(())
    }

    async fn stats(&self) -> StorageResult<StoreStats> {
        let response = self.send(self.client.get(self.url("stats")?), "stats").await?;
        let response = Self::check(response, "stats").await?;
        Self::json(response, "stats").await
    }
}

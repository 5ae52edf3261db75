//! Test collaborators shared by the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pageflow_engine::{
    AiClient, CollaboratorError, CollaboratorResult, ComponentRegistry, HttpClient,
    NavigationTarget, Navigator,
};
use pageflow_model::HttpMethod;
use pageflow_storage::{KvStore, MemoryStore, StorageError, StorageResult};
use serde_json::{Map, Value};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};

pub fn map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(m) => m,
        _ => panic!("expected object"),
    }
}

pub fn registry() -> ComponentRegistry {
    ComponentRegistry::with_builtin(["Stack", "Card", "Text", "Button", "List", "Badge", "Input"])
}

// ── Stores ───────────────────────────────────────────────────────

/// Memory store that counts reads and writes.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl CountingStore {
    pub fn with_entries(entries: Value) -> Self {
        Self {
            inner: MemoryStore::with_entries(map(entries)),
            ..Self::default()
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for CountingStore {
    fn backend_name(&self) -> &'static str {
        "counting"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys().await
    }
}

/// Reads succeed, every write fails.
pub struct ReadOnlyStore {
    pub inner: MemoryStore,
}

impl ReadOnlyStore {
    pub fn with_entries(entries: Value) -> Self {
        Self {
            inner: MemoryStore::with_entries(map(entries)),
        }
    }
}

#[async_trait]
impl KvStore for ReadOnlyStore {
    fn backend_name(&self) -> &'static str {
        "read-only"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, _key: &str, _value: Value) -> StorageResult<()> {
        Err(StorageError::Network("backend unavailable".into()))
    }

    async fn delete(&self, _key: &str) -> StorageResult<bool> {
        Err(StorageError::Network("backend unavailable".into()))
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys().await
    }
}

/// Reads block until the gate is opened.
pub struct GatedStore {
    pub inner: MemoryStore,
    gate: watch::Sender<bool>,
    started: Notify,
    gets: AtomicUsize,
    /// Read the value before waiting on the gate, so an open gate hands
    /// back what the store held when the read began.
    read_first: bool,
}

impl GatedStore {
    pub fn with_entries(entries: Value) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            inner: MemoryStore::with_entries(map(entries)),
            gate,
            started: Notify::new(),
            gets: AtomicUsize::new(0),
            read_first: false,
        }
    }

    pub fn reading_early(entries: Value) -> Self {
        Self {
            read_first: true,
            ..Self::with_entries(entries)
        }
    }

    /// Resolves once some read is waiting on the gate.
    pub async fn read_started(&self) {
        self.started.notified().await;
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for GatedStore {
    fn backend_name(&self) -> &'static str {
        "gated"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let early = if self.read_first {
            Some(self.inner.get(key).await?)
        } else {
            None
        };
        self.started.notify_one();
        let mut rx = self.gate.subscribe();
        rx.wait_for(|open| *open)
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;
        match early {
            Some(value) => Ok(value),
            None => self.inner.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys().await
    }
}

/// Every read takes far longer than any test timeout.
#[derive(Default)]
pub struct SlowStore {
    pub inner: MemoryStore,
}

#[async_trait]
impl KvStore for SlowStore {
    fn backend_name(&self) -> &'static str {
        "slow"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys().await
    }
}

// ── HTTP / navigation / AI ───────────────────────────────────────

/// Answers every request with a fixed body and records the calls.
pub struct StubHttp {
    response: Value,
    fail: bool,
    pub calls: Mutex<Vec<(String, HttpMethod, Option<Value>)>>,
}

impl StubHttp {
    pub fn returning(response: Value) -> Self {
        Self {
            response,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: Value::Null,
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for StubHttp {
    async fn request(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
    ) -> CollaboratorResult<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.to_string(), method, body));
        if self.fail {
            return Err(CollaboratorError::new(format!("{endpoint} returned 503")));
        }
        Ok(self.response.clone())
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub visited: Mutex<Vec<NavigationTarget>>,
}

#[async_trait]
impl Navigator for RecordingNavigator {
    async fn go_to(&self, target: NavigationTarget) -> CollaboratorResult<()> {
        self.visited.lock().unwrap().push(target);
        Ok(())
    }
}

/// Echoes the prompt back, upper-cased.
#[derive(Default)]
pub struct ShoutingAi {
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl AiClient for ShoutingAi {
    async fn complete(&self, prompt: &str) -> CollaboratorResult<Value> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(Value::String(prompt.to_uppercase()))
    }
}

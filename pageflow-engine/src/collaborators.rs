//! Contracts for everything the engine consumes but does not own.
//!
//! Storage comes from `pageflow-storage`; HTTP, navigation, AI and custom
//! handlers are defined here. All are injected through [`Collaborators`].

use crate::context::ContextSnapshot;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use pageflow_model::HttpMethod;
use pageflow_storage::{KvStore, MemoryStore};
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// HTTP layer used by `api` data sources and actions.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
    ) -> CollaboratorResult<Value>;
}

/// Where a `navigate` action goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    Path(String),
    Tab(String),
}

impl fmt::Display for NavigationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationTarget::Path(p) => write!(f, "path {p}"),
            NavigationTarget::Tab(t) => write!(f, "tab {t}"),
        }
    }
}

/// Page/navigation shell.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn go_to(&self, target: NavigationTarget) -> CollaboratorResult<()>;
}

/// Text generation backend for `ai` data sources with a `prompt`.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> CollaboratorResult<Value>;
}

/// Host logic invoked by `custom` actions.
///
/// Returning `Some(value)` writes `value` to the action's target, when it
/// has one.
#[async_trait]
pub trait CustomHandler: Send + Sync {
    async fn call(
        &self,
        payload: Value,
        context: &ContextSnapshot,
    ) -> CollaboratorResult<Option<Value>>;
}

/// Adapts a synchronous closure into a [`CustomHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> CustomHandler for FnHandler<F>
where
    F: Fn(Value, &ContextSnapshot) -> CollaboratorResult<Option<Value>> + Send + Sync,
{
    async fn call(
        &self,
        payload: Value,
        context: &ContextSnapshot,
    ) -> CollaboratorResult<Option<Value>> {
        (self.0)(payload, context)
    }
}

/// Name → custom handler lookup table.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn CustomHandler>>,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerTable").field("handlers", &names).finish()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn CustomHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Registers a closure handler.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, &ContextSnapshot) -> CollaboratorResult<Option<Value>> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CustomHandler>> {
        self.handlers.get(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Every external dependency of a page runtime.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn KvStore>,
    pub http: Option<Arc<dyn HttpClient>>,
    pub navigator: Option<Arc<dyn Navigator>>,
    pub ai: Option<Arc<dyn AiClient>>,
    pub handlers: HandlerTable,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("store", &self.store.backend_name())
            .field("http", &self.http.is_some())
            .field("navigator", &self.navigator.is_some())
            .field("ai", &self.ai.is_some())
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }
}

impl Collaborators {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            http: None,
            navigator: None,
            ai: None,
            handlers: HandlerTable::new(),
        }
    }

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn with_ai(mut self, ai: Arc<dyn AiClient>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn CustomHandler>) -> Self {
        self.handlers.register(name, handler);
        self
    }
}

/// [`HttpClient`] over reqwest.
///
/// Relative endpoints (`/api/todos`) are joined onto the base URL when one
/// is configured. Empty response bodies come back as `null`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
    base_url: Option<Url>,
}

impl ReqwestHttpClient {
    pub fn new() -> CollaboratorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CollaboratorError::new(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> CollaboratorResult<Self> {
        let url = Url::parse(base_url)
            .map_err(|e| CollaboratorError::new(format!("invalid base url '{base_url}': {e}")))?;
        self.base_url = Some(url);
        Ok(self)
    }

    fn resolve(&self, endpoint: &str) -> CollaboratorResult<Url> {
        let parsed = match &self.base_url {
            Some(base) => base.join(endpoint),
            None => Url::parse(endpoint),
        };
        parsed.map_err(|e| CollaboratorError::new(format!("invalid endpoint '{endpoint}': {e}")))
    }
}

fn reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
    ) -> CollaboratorResult<Value> {
        let url = self.resolve(endpoint)?;
        debug!(%url, %method, "http request");
        let mut request = self.client.request(reqwest_method(method), url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CollaboratorError::new(format!("request to {endpoint} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::new(format!("reading {endpoint} failed: {e}")))?;
        if !status.is_success() {
            return Err(CollaboratorError::new(format!(
                "{endpoint} returned {}: {text}",
                status.as_u16()
            )));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| CollaboratorError::new(format!("{endpoint} returned invalid JSON: {e}")))
    }
}

//! Shared pieces of the `pageflow` command-line runner.

use anyhow::{Context, Result};
use async_trait::async_trait;
use pageflow_engine::{
    ActionTrace, CollaboratorResult, Collaborators, ComponentRegistry, ContextSnapshot,
    EngineConfig, NavigationTarget, Navigator, PageRuntime, RenderNode, ReqwestHttpClient,
    SourceGraph,
};
use pageflow_model::{PageSchema, validate_schema};
use pageflow_storage::{FileStore, KvStore, MemoryStore, RemoteStore};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Navigation shell for a headless run: every request is logged and recorded.
#[derive(Debug, Default)]
pub struct LoggingNavigator {
    visited: std::sync::Mutex<Vec<String>>,
}

impl LoggingNavigator {
    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Navigator for LoggingNavigator {
    async fn go_to(&self, target: NavigationTarget) -> CollaboratorResult<()> {
        info!("Navigating to {}", target);
        if let Ok(mut visited) = self.visited.lock() {
            visited.push(target.to_string());
        }
        Ok(())
    }
}

/// Where page storage lives for a run.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// JSON file backing the store.
    pub file: Option<std::path::PathBuf>,
    /// Base URL of a `/api/storage` backend.
    pub remote: Option<String>,
}

pub async fn open_store(options: &StoreOptions) -> Result<Arc<dyn KvStore>> {
    if let Some(url) = &options.remote {
        let store = RemoteStore::new(url).with_context(|| format!("invalid storage url {url}"))?;
        info!("Using remote storage at {}", store.base_url());
        return Ok(Arc::new(store));
    }
    if let Some(path) = &options.file {
        let store = FileStore::open(path)
            .await
            .with_context(|| format!("failed to open store {}", path.display()))?;
        info!("Using file storage at {:?}", store.path());
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(MemoryStore::new()))
}

/// Collaborators for a headless run.
pub fn collaborators(store: Arc<dyn KvStore>, api_base: Option<&str>) -> Result<Collaborators> {
    let mut http = ReqwestHttpClient::new()?;
    if let Some(base) = api_base {
        http = http.with_base_url(base)?;
    }
    Ok(Collaborators::new(store)
        .with_http(Arc::new(http))
        .with_navigator(Arc::new(LoggingNavigator::default())))
}

/// Registry for a run. With no explicit names, every component type the
/// schema uses is registered.
pub fn registry_for(schema: &PageSchema, names: &[String]) -> ComponentRegistry {
    if names.is_empty() {
        ComponentRegistry::with_builtin(
            schema
                .all_components()
                .map(|node| node.component_type.clone())
                .collect::<std::collections::BTreeSet<_>>(),
        )
    } else {
        ComponentRegistry::with_builtin(names.iter().cloned())
    }
}

pub fn read_schema(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

// ── validate ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub page: String,
    pub data_sources: usize,
    pub actions: usize,
    pub components: usize,
    /// Resolution order, empty when the graph has a cycle.
    pub order: Vec<String>,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Parses `json` and reports every structural problem instead of stopping
/// at the first.
pub fn validate(json: &str) -> Result<ValidationReport> {
    let schema: PageSchema = serde_json::from_str(json).context("schema is not valid JSON")?;
    let mut issues: Vec<String> = validate_schema(&schema)
        .into_iter()
        .map(|issue| format!("[{}] {}", issue.kind, issue.message))
        .collect();
    let order = match SourceGraph::build(&schema.data_sources) {
        Ok(graph) => graph.order().to_vec(),
        Err(cycle) => {
            issues.push(cycle.to_string());
            Vec::new()
        }
    };
    Ok(ValidationReport {
        page: schema.id.clone(),
        data_sources: schema.data_sources.len(),
        actions: schema.actions.len(),
        components: schema.all_components().count(),
        order,
        issues,
    })
}

// ── render / fire ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub nodes: Vec<RenderNode>,
    pub context: Map<String, Value>,
    /// Failed data sources and their reasons.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    #[serde(rename = "unknownComponents", skip_serializing_if = "Vec::is_empty")]
    pub unknown_components: Vec<String>,
}

pub async fn load_page(
    json: &str,
    names: &[String],
    collaborators: Collaborators,
    config: EngineConfig,
) -> Result<PageRuntime> {
    let schema = pageflow_model::load_page_schema(json).context("invalid page schema")?;
    let registry = registry_for(&schema, names);
    let page = PageRuntime::load(schema, registry, collaborators, config)
        .await
        .context("failed to load page")?;
    page.resolve_all().await.context("failed to resolve data sources")?;
    Ok(page)
}

pub async fn render(page: &PageRuntime) -> RenderReport {
    let output = page.render().await;
    let context = page.context().await;
    RenderReport {
        unknown_components: output.errors.iter().map(|e| e.to_string()).collect(),
        nodes: output.nodes,
        errors: context.errors(),
        context: context.into_values(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FireReport {
    pub trace: ActionTrace,
    pub context: ContextSnapshot,
}

pub async fn fire(
    page: &PageRuntime,
    action: &str,
    payload: Map<String, Value>,
    event: Value,
) -> FireReport {
    let trace = page.execute_traced(action, payload, event).await;
    FireReport {
        trace,
        context: page.context().await,
    }
}

/// Parses an optional JSON object argument.
pub fn parse_object(arg: Option<&str>) -> Result<Map<String, Value>> {
    match arg {
        None => Ok(Map::new()),
        Some(text) => match serde_json::from_str(text).context("payload is not valid JSON")? {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!("payload must be a JSON object, got {other}"),
        },
    }
}

//! One live page instance.

use crate::actions::ActionTrace;
use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::context::{Context, ContextSnapshot};
use crate::error::{ActionError, ActionResult, EngineError, EngineResult, UnknownComponentError};
use crate::graph::SourceGraph;
use crate::registry::ComponentRegistry;
use crate::sources::SharedFetch;
use crate::subscriptions::Subscriptions;
use crate::tree::{ActionDispatch, RenderOutput, TreeResolver};
use async_trait::async_trait;
use pageflow_expr::Evaluator;
use pageflow_model::{ModelError, PageInstanceId, PageSchema, load_page_schema, validate_schema};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Sent to subscribers after data source values change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextChange {
    /// Context revision after the change.
    pub revision: u64,
    /// Data source ids whose value changed.
    pub changed: BTreeSet<String>,
    /// Component node ids that read any of `changed`.
    pub affected_nodes: BTreeSet<String>,
}

pub(crate) struct PageInner {
    pub(crate) instance: PageInstanceId,
    pub(crate) schema: PageSchema,
    pub(crate) graph: SourceGraph,
    pub(crate) config: EngineConfig,
    pub(crate) evaluator: Evaluator,
    pub(crate) collaborators: Collaborators,
    pub(crate) registry: ComponentRegistry,
    pub(crate) subscriptions: Subscriptions,
    pub(crate) context: RwLock<Context>,
    pub(crate) inflight: Mutex<HashMap<String, SharedFetch>>,
    pub(crate) target_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) changes: broadcast::Sender<ContextChange>,
}

impl PageInner {
    pub(crate) fn ensure_live(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    pub(crate) async fn snapshot(&self) -> ContextSnapshot {
        self.context.read().await.snapshot()
    }

    /// Broadcasts a change notification when `changed` is non-empty.
    pub(crate) async fn notify(&self, changed: &BTreeSet<String>) {
        if changed.is_empty() || self.cancel.is_cancelled() {
            return;
        }
        let change = ContextChange {
            revision: self.context.read().await.revision(),
            changed: changed.clone(),
            affected_nodes: self.subscriptions.affected(changed),
        };
        debug!(
            page = %self.schema.id,
            changed = ?change.changed,
            affected = ?change.affected_nodes,
            "context changed"
        );
        // No receivers is fine.
        let _ = self.changes.send(change);
    }
}

/// A loaded page: schema, context and everything needed to resolve,
/// render and act on it.
///
/// Cloning is cheap and every clone drives the same instance. Each
/// instance has its own Context; tearing one down never touches another.
#[derive(Clone)]
pub struct PageRuntime {
    inner: Arc<PageInner>,
}

impl std::fmt::Debug for PageRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRuntime")
            .field("page", &self.inner.schema.id)
            .field("instance", &self.inner.instance)
            .field("torn_down", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

impl PageRuntime {
    /// Loads `schema` into a fresh page instance.
    ///
    /// Structural defects fail here, before any resolution: validation
    /// issues, dependency cycles and component types missing from
    /// `registry`. Seed data is written to the store for keys it lacks.
    pub async fn load(
        schema: PageSchema,
        registry: ComponentRegistry,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let issues = validate_schema(&schema);
        if !issues.is_empty() {
            return Err(ModelError::Invalid(issues).into());
        }
        let graph = SourceGraph::build(&schema.data_sources)?;
        check_component_types(&schema, &registry)?;

        if !schema.seed_data.is_empty() {
            pageflow_storage::seed(collaborators.store.as_ref(), &schema.seed_data).await?;
        }

        let evaluator = Evaluator::new().with_max_depth(config.max_eval_depth);
        let subscriptions = Subscriptions::build(&schema.components, &evaluator);

        let mut context = Context::default();
        for source in &schema.data_sources {
            context.init(&source.id, source.default_or_null());
        }

        let instance = PageInstanceId::new();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        info!(
            page = %schema.id,
            %instance,
            sources = schema.data_sources.len(),
            actions = schema.actions.len(),
            "page loaded"
        );

        Ok(Self {
            inner: Arc::new(PageInner {
                instance,
                schema,
                graph,
                config,
                evaluator,
                collaborators,
                registry,
                subscriptions,
                context: RwLock::new(context),
                inflight: Mutex::new(HashMap::new()),
                target_locks: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
                changes,
            }),
        })
    }

    /// Parses, version-checks and validates `json`, then loads it.
    pub async fn from_json(
        json: &str,
        registry: ComponentRegistry,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let schema = load_page_schema(json)?;
        Self::load(schema, registry, collaborators, config).await
    }

    pub fn instance_id(&self) -> PageInstanceId {
        self.inner.instance
    }

    pub fn schema(&self) -> &PageSchema {
        &self.inner.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn graph(&self) -> &SourceGraph {
        &self.inner.graph
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.inner.registry
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.inner.evaluator
    }

    /// Read-only copy of the current Context.
    pub async fn context(&self) -> ContextSnapshot {
        self.inner.snapshot().await
    }

    /// Resolves every data source in dependency order.
    ///
    /// Fetched sources that are already `Ready` are not fetched again and
    /// derived sources whose inputs are unchanged are not recomputed, so a
    /// second call on a settled page touches no collaborator.
    pub async fn resolve_all(&self) -> EngineResult<ContextSnapshot> {
        let changed = self.inner.resolve_all().await?;
        self.inner.notify(&changed).await;
        Ok(self.inner.snapshot().await)
    }

    /// Re-fetches (or recomputes) one source regardless of its state, then
    /// recomputes its dependents. Returns every id whose value changed.
    pub async fn refresh(&self, id: &str) -> EngineResult<BTreeSet<String>> {
        let changed = self.inner.refresh(id).await?;
        self.inner.notify(&changed).await;
        Ok(changed)
    }

    /// Recomputes the derived descendants of `id`. Returns the ids whose
    /// value changed as a result.
    pub async fn recompute(&self, id: &str) -> EngineResult<BTreeSet<String>> {
        if !self.inner.graph.contains(id) {
            return Err(EngineError::UnknownSource(id.to_string()));
        }
        let changed = self.inner.recompute(id).await?;
        self.inner.notify(&changed).await;
        Ok(changed)
    }

    /// Resolves the component tree against the current Context.
    pub async fn render(&self) -> RenderOutput {
        let snapshot = self.inner.snapshot().await;
        let dispatcher: Arc<dyn ActionDispatch> = Arc::new(self.clone());
        let resolver = TreeResolver::new(
            &snapshot,
            &self.inner.registry,
            &self.inner.evaluator,
            dispatcher,
        );
        resolver.resolve(&self.inner.schema.components)
    }

    /// Runs `action_id` and its chain. Returns the root action's outcome,
    /// or `ChainTooDeep` when the chain had to be cut off.
    pub async fn execute(&self, action_id: &str, overrides: Map<String, Value>) -> ActionResult<()> {
        self.inner.run_chain(action_id, overrides, Value::Null).await.1
    }

    /// Like [`execute`](Self::execute) but returns every step of the chain.
    pub async fn execute_traced(
        &self,
        action_id: &str,
        overrides: Map<String, Value>,
        event: Value,
    ) -> ActionTrace {
        self.inner.run_chain(action_id, overrides, event).await.0
    }

    /// Receives a [`ContextChange`] after every write that changes values.
    pub fn subscribe(&self) -> broadcast::Receiver<ContextChange> {
        self.inner.changes.subscribe()
    }

    /// Component node ids that read `source`.
    pub fn subscribers(&self, source: &str) -> BTreeSet<String> {
        self.inner.subscriptions.subscribers(source)
    }

    /// Cancels everything belonging to this instance. Results of external
    /// calls still in flight are discarded when they arrive.
    pub fn teardown(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!(page = %self.inner.schema.id, instance = %self.inner.instance, "page torn down");
            self.inner.cancel.cancel();
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Token cancelled on [`teardown`](Self::teardown), for host tasks tied
    /// to this page.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }
}

#[async_trait]
impl ActionDispatch for PageRuntime {
    async fn dispatch(
        &self,
        action_id: &str,
        payload: Map<String, Value>,
        event: Value,
    ) -> ActionResult<()> {
        if self.is_torn_down() {
            return Err(ActionError::Cancelled);
        }
        self.inner.run_chain(action_id, payload, event).await.1
    }
}

/// Every component type in the tree must be registered.
fn check_component_types(
    schema: &PageSchema,
    registry: &ComponentRegistry,
) -> Result<(), UnknownComponentError> {
    match schema
        .all_components()
        .find(|node| !registry.contains(&node.component_type))
    {
        Some(node) => Err(UnknownComponentError {
            type_name: node.component_type.clone(),
            node_id: node.id.clone(),
        }),
        None => Ok(()),
    }
}

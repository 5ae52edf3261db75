//! Action execution and `onSuccess`/`onError` chaining.
//!
//! Each invocation moves `Pending -> Applying -> Succeeded | Failed`. A
//! chained action starts only after its trigger reaches a terminal state.
//! Data-mutating actions write Context first and persist to the store
//! afterwards; a failed persist rolls the Context back.

use crate::context::SourceState;
use crate::error::{ActionError, ActionResult, CollaboratorError};
use crate::collaborators::NavigationTarget;
use crate::runtime::PageInner;
use pageflow_expr::{Scope, has_placeholders, strict_equals, type_name};
use pageflow_model::{Action, ActionKind, DataSource, HttpMethod, SourceKind};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lifecycle of one action invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    Pending,
    Applying,
    Succeeded,
    Failed,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionState::Succeeded | ActionState::Failed)
    }
}

/// One executed (or rejected) action in a chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    pub action_id: String,
    /// 0 for the action that was invoked, +1 per chain hop.
    pub depth: usize,
    pub state: ActionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Data source ids whose value changed.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub changed: BTreeSet<String>,
}

/// Every step of an action chain, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionTrace {
    pub steps: Vec<ActionStep>,
}

impl ActionTrace {
    pub fn root(&self) -> Option<&ActionStep> {
        self.steps.first()
    }

    /// True when the invoked action itself succeeded.
    pub fn succeeded(&self) -> bool {
        self.root().is_some_and(|s| s.state == ActionState::Succeeded)
    }

    pub fn action_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.action_id.as_str()).collect()
    }

    pub fn step(&self, action_id: &str) -> Option<&ActionStep> {
        self.steps.iter().find(|s| s.action_id == action_id)
    }

    /// Union of every step's changed ids.
    pub fn changed(&self) -> BTreeSet<String> {
        self.steps.iter().flat_map(|s| s.changed.iter().cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl PageInner {
    /// Runs `action_id` and follows its chain until it ends, the page is
    /// torn down or the depth limit is hit.
    ///
    /// `overrides` apply to the invoked action only; `event` is visible to
    /// every action in the chain.
    pub(crate) async fn run_chain(
        &self,
        action_id: &str,
        overrides: Map<String, Value>,
        event: Value,
    ) -> (ActionTrace, ActionResult<()>) {
        let limit = self.config.max_chain_depth;
        let mut trace = ActionTrace::default();
        let mut root: Option<ActionResult<()>> = None;
        let mut cut_off: Option<ActionError> = None;
        let mut overrides = Some(overrides);
        let mut next = Some(action_id.to_string());
        let mut depth = 0;

        while let Some(id) = next.take() {
            if depth > limit {
                let err = ActionError::ChainTooDeep { depth, limit };
                warn!(action = %id, depth, limit, "action chain too deep, stopping");
                trace.steps.push(ActionStep {
                    action_id: id,
                    depth,
                    state: ActionState::Failed,
                    error: Some(err.to_string()),
                    changed: BTreeSet::new(),
                });
                cut_off = Some(err);
                break;
            }

            debug!(action = %id, depth, state = ?ActionState::Pending, "action queued");
            let step_overrides = overrides.take().unwrap_or_default();
            let outcome = self.apply(&id, step_overrides, &event).await;

            let action = self.schema.action(&id);
            let mut step = ActionStep {
                action_id: id.clone(),
                depth,
                state: ActionState::Succeeded,
                error: None,
                changed: BTreeSet::new(),
            };
            let result = match outcome {
                Ok(changed) => {
                    debug!(action = %id, depth, changed = ?changed, "action succeeded");
                    step.changed = changed;
                    next = action.and_then(|a| a.on_success.clone());
                    Ok(())
                }
                Err(err) => {
                    warn!(action = %id, depth, error = %err, "action failed");
                    step.state = ActionState::Failed;
                    step.error = Some(err.to_string());
                    if !matches!(err, ActionError::UnknownAction(_) | ActionError::Cancelled) {
                        next = action.and_then(|a| a.on_error.clone());
                    }
                    Err(err)
                }
            };
            trace.steps.push(step);
            if root.is_none() {
                root = Some(result);
            }
            depth += 1;
        }

        let result = match (root, cut_off) {
            (Some(Err(err)), _) => Err(err),
            (_, Some(err)) => Err(err),
            _ => Ok(()),
        };
        (trace, result)
    }

    /// Runs a single action. Returns the data source ids whose value changed.
    async fn apply(
        &self,
        id: &str,
        overrides: Map<String, Value>,
        event: &Value,
    ) -> ActionResult<BTreeSet<String>> {
        self.ensure_live()?;
        let action = self
            .schema
            .action(id)
            .ok_or_else(|| ActionError::UnknownAction(id.to_string()))?;
        debug!(action = id, kind = %action.kind, state = ?ActionState::Applying, "applying action");
        let payload = self.resolve_payload(action, overrides, event).await?;

        match action.kind {
            ActionKind::Create | ActionKind::Update | ActionKind::Delete => {
                let source = self.writable_target(action)?;
                self.write_target(action, source, |current| {
                    mutate(action, source, current, &payload)
                })
                .await
            }
            ActionKind::Navigate => {
                self.navigate(action, &payload).await?;
                Ok(BTreeSet::new())
            }
            ActionKind::Api => self.call_api(action, &payload).await,
            ActionKind::Custom => self.call_custom(action, payload).await,
        }
    }

    /// The action's payload, extended by `overrides`, with every string
    /// template interpolated against `context`, `event` and `payload`.
    async fn resolve_payload(
        &self,
        action: &Action,
        overrides: Map<String, Value>,
        event: &Value,
    ) -> ActionResult<Map<String, Value>> {
        let mut raw = action.payload.clone();
        raw.extend(overrides);

        let values = self.context.read().await.values().clone();
        let scope = Scope::new(&values)
            .with_var("event", Some(event.clone()))
            .with_var("payload", Some(Value::Object(raw.clone())));

        let mut resolved = Map::new();
        for (key, value) in raw {
            if let Some(value) = self.interpolate_value(action, value, &scope)? {
                resolved.insert(key, value);
            }
        }
        Ok(resolved)
    }

    /// `None` drops the key from its object; inside arrays it becomes `null`.
    fn interpolate_value(
        &self,
        action: &Action,
        value: Value,
        scope: &Scope<'_>,
    ) -> ActionResult<Option<Value>> {
        match value {
            Value::String(text) if has_placeholders(&text) => self
                .evaluator
                .interpolate(&text, scope)
                .map_err(|source| ActionError::Eval {
                    action: action.id.clone(),
                    source,
                }),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.interpolate_value(action, item, scope)?.unwrap_or(Value::Null));
                }
                Ok(Some(Value::Array(out)))
            }
            Value::Object(fields) => {
                let mut out = Map::new();
                for (key, item) in fields {
                    if let Some(item) = self.interpolate_value(action, item, scope)? {
                        out.insert(key, item);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            other => Ok(Some(other)),
        }
    }

    fn writable_target(&self, action: &Action) -> ActionResult<&DataSource> {
        let target = action
            .target
            .as_deref()
            .ok_or_else(|| ActionError::MissingTarget(action.id.clone()))?;
        let source = self
            .schema
            .data_source(target)
            .ok_or_else(|| ActionError::UnknownTarget {
                action: action.id.clone(),
                target: target.to_string(),
            })?;
        if source.is_derived() {
            return Err(ActionError::ReadOnlyTarget {
                action: action.id.clone(),
                target: target.to_string(),
            });
        }
        Ok(source)
    }

    /// Optional target for `api` and `custom` actions, checked before any
    /// collaborator call.
    fn optional_target(&self, action: &Action) -> ActionResult<Option<&DataSource>> {
        match action.target {
            Some(_) => self.writable_target(action).map(Some),
            None => Ok(None),
        }
    }

    async fn target_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.target_locks.lock().await;
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Computes and writes the target's new value, recomputes dependents
    /// and persists `kv` targets.
    async fn write_target<F>(
        &self,
        action: &Action,
        source: &DataSource,
        compute: F,
    ) -> ActionResult<BTreeSet<String>>
    where
        F: FnOnce(Value) -> ActionResult<Value> + Send,
    {
        let _guard = if self.config.serialize_per_target {
            Some(self.target_lock(&source.id).await.lock_owned().await)
        } else {
            None
        };
        self.ensure_live()?;

        let (previous, previous_state) = {
            let ctx = self.context.read().await;
            (
                ctx.get(&source.id)
                    .cloned()
                    .unwrap_or_else(|| source.default_or_null()),
                ctx.state(&source.id).cloned().unwrap_or(SourceState::Pending),
            )
        };
        let next = compute(previous.clone())?;

        let written = self
            .context
            .write()
            .await
            .write_from_action(&source.id, next.clone(), SourceState::Ready);
        // Later resolutions must not join a fetch that read the old value.
        self.inflight.lock().await.remove(&source.id);
        let mut changed = BTreeSet::new();
        if written.value {
            changed.insert(source.id.clone());
        }
        if written.any() {
            changed.extend(self.recompute(&source.id).await?);
        }

        if let SourceKind::Kv { key, .. } = &source.kind {
            if let Err(err) = self.persist(action, key, next).await {
                if matches!(err, ActionError::Cancelled) {
                    return Err(err);
                }
                warn!(action = %action.id, target = %source.id, error = %err, "persist failed, rolling back");
                self.context
                    .write()
                    .await
                    .write_from_action(&source.id, previous, previous_state);
                self.recompute(&source.id).await?;
                return Err(err);
            }
        }

        self.notify(&changed).await;
        Ok(changed)
    }

    async fn persist(&self, action: &Action, key: &str, value: Value) -> ActionResult<()> {
        let store = Arc::clone(&self.collaborators.store);
        self.timed(action, store.set(key, value))
            .await?
            .map_err(|source| ActionError::Storage {
                action: action.id.clone(),
                source,
            })
    }

    async fn navigate(&self, action: &Action, payload: &Map<String, Value>) -> ActionResult<()> {
        let target = if let Some(path) = payload.get("path").and_then(Value::as_str) {
            NavigationTarget::Path(path.to_string())
        } else if let Some(tab) = payload.get("tab").and_then(Value::as_str) {
            NavigationTarget::Tab(tab.to_string())
        } else {
            return Err(invalid(action, "navigate needs a 'path' or 'tab'"));
        };
        let navigator = self.collaborators.navigator.clone().ok_or_else(|| {
            ActionError::MissingCollaborator {
                action: action.id.clone(),
                collaborator: "navigator",
            }
        })?;
        info!(action = %action.id, %target, "navigating");
        self.timed(action, navigator.go_to(target))
            .await?
            .map_err(|source| collaborator_failed(action, source))
    }

    async fn call_api(
        &self,
        action: &Action,
        payload: &Map<String, Value>,
    ) -> ActionResult<BTreeSet<String>> {
        let endpoint = payload
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(action, "api needs a string 'endpoint'"))?
            .to_string();
        let method = match payload.get("method") {
            None | Some(Value::Null) => HttpMethod::default(),
            Some(Value::String(name)) => HttpMethod::parse(name)
                .ok_or_else(|| invalid(action, format!("unsupported method '{name}'")))?,
            Some(other) => {
                return Err(invalid(
                    action,
                    format!("'method' must be a string, found {}", type_name(Some(other))),
                ));
            }
        };
        let body = payload.get("body").cloned();
        let target = self.optional_target(action)?;
        let http = self
            .collaborators
            .http
            .clone()
            .ok_or_else(|| ActionError::MissingCollaborator {
                action: action.id.clone(),
                collaborator: "http client",
            })?;

        debug!(action = %action.id, %endpoint, %method, "calling api");
        let response = self
            .timed(action, http.request(&endpoint, method, body))
            .await?
            .map_err(|source| collaborator_failed(action, source))?;

        match target {
            Some(source) => self.write_target(action, source, |_| Ok(response)).await,
            None => Ok(BTreeSet::new()),
        }
    }

    async fn call_custom(
        &self,
        action: &Action,
        payload: Map<String, Value>,
    ) -> ActionResult<BTreeSet<String>> {
        let name = action
            .handler
            .as_deref()
            .ok_or_else(|| invalid(action, "custom action has no 'handler'"))?;
        let handler = self
            .collaborators
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ActionError::UnknownHandler(name.to_string()))?;
        let target = self.optional_target(action)?;

        let snapshot = self.snapshot().await;
        debug!(action = %action.id, handler = name, "calling custom handler");
        let result = self
            .timed(action, handler.call(Value::Object(payload), &snapshot))
            .await?
            .map_err(|source| collaborator_failed(action, source))?;

        match (target, result) {
            (Some(source), Some(value)) => self.write_target(action, source, |_| Ok(value)).await,
            _ => Ok(BTreeSet::new()),
        }
    }

    /// Bounds a collaborator call by the configured timeout. Late results
    /// for a torn-down page are discarded.
    async fn timed<T, E>(
        &self,
        action: &Action,
        call: impl Future<Output = Result<T, E>>,
    ) -> ActionResult<Result<T, E>> {
        let outcome = tokio::time::timeout(self.config.fetch_timeout(), call).await;
        self.ensure_live()?;
        outcome.map_err(|_| {
            warn!(action = %action.id, "collaborator call timed out");
            collaborator_failed(action, CollaboratorError::timeout())
        })
    }
}

fn invalid(action: &Action, message: impl Into<String>) -> ActionError {
    ActionError::InvalidPayload {
        action: action.id.clone(),
        message: message.into(),
    }
}

fn collaborator_failed(action: &Action, source: CollaboratorError) -> ActionError {
    ActionError::Collaborator {
        action: action.id.clone(),
        source,
    }
}

/// New value of a `create`/`update`/`delete` target.
fn mutate(
    action: &Action,
    source: &DataSource,
    current: Value,
    payload: &Map<String, Value>,
) -> ActionResult<Value> {
    match action.kind {
        ActionKind::Create => create(action, current, payload),
        ActionKind::Update => update(action, current, payload),
        ActionKind::Delete => Ok(delete(source, current, payload)),
        other => Err(invalid(action, format!("{other} does not mutate its target"))),
    }
}

/// Appends `payload.item` (or the whole payload) to an array target.
fn create(action: &Action, current: Value, payload: &Map<String, Value>) -> ActionResult<Value> {
    let item = payload
        .get("item")
        .cloned()
        .unwrap_or_else(|| Value::Object(payload.clone()));
    match current {
        Value::Array(mut items) => {
            items.push(item);
            Ok(Value::Array(items))
        }
        Value::Null => Ok(Value::Array(vec![item])),
        other => Err(invalid(
            action,
            format!("create needs an array target, found {}", type_name(Some(&other))),
        )),
    }
}

/// `payload.value` replaces the target outright. Otherwise array targets
/// merge the payload into the element whose `id` matches `payload.id`, and
/// object targets are shallow-merged.
fn update(action: &Action, current: Value, payload: &Map<String, Value>) -> ActionResult<Value> {
    if let Some(value) = payload.get("value") {
        return Ok(value.clone());
    }
    match current {
        Value::Array(mut items) => {
            let id = payload
                .get("id")
                .ok_or_else(|| invalid(action, "update of a list needs 'id' or 'value'"))?;
            let item = items
                .iter_mut()
                .find(|item| strict_equals(item.get("id"), Some(id)))
                .ok_or_else(|| invalid(action, format!("no item with id {id}")))?;
            match item {
                Value::Object(fields) => {
                    fields.extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                other => *other = Value::Object(payload.clone()),
            }
            Ok(Value::Array(items))
        }
        Value::Object(mut fields) => {
            fields.extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::Object(fields))
        }
        Value::Null => Ok(Value::Object(payload.clone())),
        other => Err(invalid(
            action,
            format!("update of a {} needs 'value'", type_name(Some(&other))),
        )),
    }
}

/// Removes the element matching `payload.id` from an array target, or
/// resets the target to its default.
fn delete(source: &DataSource, current: Value, payload: &Map<String, Value>) -> Value {
    match (current, payload.get("id")) {
        (Value::Array(mut items), Some(id)) => {
            items.retain(|item| !strict_equals(item.get("id"), Some(id)));
            Value::Array(items)
        }
        _ => source.default_or_null(),
    }
}

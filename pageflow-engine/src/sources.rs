//! Data source resolution and recomputation.
//!
//! Sources resolve in topological order. Fetched sources (`kv`, `api`)
//! read through collaborators with at most one call in flight per id;
//! derived sources (`computed`, `ai`) evaluate their transform once all
//! dependencies have values. Failures are recorded per source and never
//! abort the pass.

use crate::context::{Context, SourceState, Written};
use crate::error::{CollaboratorError, EngineError, EngineResult};
use crate::runtime::PageInner;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use pageflow_expr::{EvalError, Scope, display};
use pageflow_model::{DataSource, SourceKind};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Outcome of an external read. `Ok(None)` means the key is absent.
pub(crate) type FetchResult = Result<Option<Value>, String>;

pub(crate) type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

impl PageInner {
    pub(crate) fn data_source(&self, id: &str) -> EngineResult<&DataSource> {
        self.schema
            .data_source(id)
            .ok_or_else(|| EngineError::UnknownSource(id.to_string()))
    }

    /// One pass over every source. Returns the ids whose value changed.
    pub(crate) async fn resolve_all(&self) -> EngineResult<BTreeSet<String>> {
        let mut changed = BTreeSet::new();
        for id in self.graph.order() {
            self.ensure_live()?;
            let source = self.data_source(id)?;
            if self.resolve_source(source, false).await?.value {
                changed.insert(id.clone());
            }
        }
        debug!(page = %self.schema.id, changed = changed.len(), "resolved all data sources");
        Ok(changed)
    }

    pub(crate) async fn refresh(&self, id: &str) -> EngineResult<BTreeSet<String>> {
        let source = self.data_source(id)?;
        let written = self.resolve_source(source, true).await?;
        let mut changed = BTreeSet::new();
        if written.value {
            changed.insert(id.to_string());
        }
        if written.any() {
            changed.extend(self.recompute(id).await?);
        }
        Ok(changed)
    }

    /// Walks the descendants of `changed_id` in topological order and
    /// re-runs every derived source that has a changed dependency. A
    /// descendant whose result is unchanged does not dirty its own
    /// dependents.
    pub(crate) async fn recompute(&self, changed_id: &str) -> EngineResult<BTreeSet<String>> {
        let mut dirty = BTreeSet::from([changed_id.to_string()]);
        let mut changed = BTreeSet::new();
        for id in self.graph.descendants(changed_id) {
            self.ensure_live()?;
            if !self.graph.dependencies(&id).iter().any(|d| dirty.contains(d)) {
                continue;
            }
            let source = self.data_source(&id)?;
            if !source.is_derived() {
                continue;
            }
            let written = self.resolve_source(source, false).await?;
            if written.any() {
                dirty.insert(id.clone());
            }
            if written.value {
                changed.insert(id);
            }
        }
        if !changed.is_empty() {
            debug!(source = changed_id, recomputed = ?changed, "recomputed dependents");
        }
        Ok(changed)
    }

    /// Resolves one source. `force` re-fetches `Ready` sources and ignores
    /// remembered inputs of derived ones.
    async fn resolve_source(&self, source: &DataSource, force: bool) -> EngineResult<Written> {
        if let Some(dep) = self.failed_dependency(source).await {
            let reason = format!("dependency '{dep}' failed");
            debug!(source = %source.id, %reason, "falling back to default");
            let mut ctx = self.context.write().await;
            ctx.forget_inputs(&source.id);
            return Ok(ctx.write(
                &source.id,
                source.default_or_null(),
                SourceState::Failed { error: reason },
            ));
        }

        match &source.kind {
            SourceKind::Static { value } => {
                // A Ready static may hold an action write; only refresh resets it.
                if !force && self.state_of(&source.id).await.is_some_and(|s| s.is_ready()) {
                    return Ok(Written::default());
                }
                let value = value.clone().unwrap_or_else(|| source.default_or_null());
                Ok(self.context.write().await.write(&source.id, value, SourceState::Ready))
            }
            SourceKind::Kv { .. } | SourceKind::Api { .. } => {
                if !force && self.state_of(&source.id).await.is_some_and(|s| s.is_ready()) {
                    return Ok(Written::default());
                }
                let generation = self.context.read().await.generation(&source.id);
                let fetched = self.fetch(source).await;
                self.ensure_live()?;
                let outcome = match fetched {
                    Ok(raw) => {
                        let raw = raw.unwrap_or_else(|| source.default_or_null());
                        self.apply_transform(source, raw).await.map_err(|e| e.to_string())
                    }
                    Err(reason) => Err(reason),
                };
                Ok(self.settle_fetched(source, outcome, generation).await)
            }
            SourceKind::Computed { .. } | SourceKind::Ai { .. } => self.compute(source, force).await,
        }
    }

    async fn failed_dependency(&self, source: &DataSource) -> Option<String> {
        let ctx = self.context.read().await;
        self.graph
            .dependencies(&source.id)
            .into_iter()
            .find(|dep| ctx.state(dep).is_some_and(SourceState::is_failed))
    }

    async fn state_of(&self, id: &str) -> Option<SourceState> {
        self.context.read().await.state(id).cloned()
    }

    /// Records a resolution outcome; failures keep the default value.
    async fn settle(&self, source: &DataSource, outcome: Result<Value, String>) -> Written {
        settle_into(&mut *self.context.write().await, source, outcome)
    }

    /// Like [`settle`](Self::settle), but drops the outcome when an action
    /// wrote the source after the fetch started.
    async fn settle_fetched(
        &self,
        source: &DataSource,
        outcome: Result<Value, String>,
        generation: u64,
    ) -> Written {
        let mut ctx = self.context.write().await;
        if ctx.generation(&source.id) != generation {
            debug!(source = %source.id, "action wrote during fetch, discarding fetched value");
            return Written::default();
        }
        settle_into(&mut ctx, source, outcome)
    }

    async fn compute(&self, source: &DataSource, force: bool) -> EngineResult<Written> {
        let (inputs, values, ready) = {
            let ctx = self.context.read().await;
            let inputs = Value::Object(self.derived_inputs(source, ctx.values()));
            let ready = ctx.state(&source.id).is_some_and(SourceState::is_ready);
            (inputs, ctx.values().clone(), ready)
        };
        if !force && ready && self.context.read().await.last_inputs(&source.id) == Some(&inputs) {
            debug!(source = %source.id, "inputs unchanged, skipping recompute");
            return Ok(Written::default());
        }

        let outcome = match &source.kind {
            SourceKind::Ai {
                prompt: Some(prompt),
                ..
            } if self.collaborators.ai.is_some() => {
                match self.ask_ai(source, prompt, &values).await {
                    Ok(reply) => {
                        self.ensure_live()?;
                        self.apply_transform(source, reply).await.map_err(|e| e.to_string())
                    }
                    Err(reason) => {
                        self.ensure_live()?;
                        Err(reason)
                    }
                }
            }
            _ => match source.transform() {
                Some(transform) => self
                    .run_transform(transform, inputs.clone(), &values)
                    .map(|v| v.unwrap_or_else(|| source.default_or_null()))
                    .map_err(|e| e.to_string()),
                None => Ok(source.default_or_null()),
            },
        };

        let succeeded = outcome.is_ok();
        let written = self.settle(source, outcome).await;
        if succeeded {
            self.context.write().await.remember_inputs(&source.id, inputs);
        }
        Ok(written)
    }

    /// Values of declared dependencies plus any other source the transform
    /// or prompt reads.
    fn derived_inputs(&self, source: &DataSource, values: &Map<String, Value>) -> Map<String, Value> {
        let mut ids: BTreeSet<String> = source.dependencies.iter().cloned().collect();
        let mut exprs: Vec<&str> = Vec::new();
        if let Some(t) = source.transform() {
            if !self.evaluator.helpers().contains(t.trim()) {
                exprs.push(t);
            }
        }
        if let SourceKind::Ai {
            prompt: Some(prompt),
            ..
        } = &source.kind
        {
            exprs.extend(pageflow_expr::placeholders(prompt));
        }
        for expr in exprs {
            if let Ok(compiled) = self.evaluator.compile(expr) {
                ids.extend(
                    compiled
                        .referenced_roots()
                        .into_iter()
                        .filter(|id| id != &source.id && self.graph.contains(id)),
                );
            }
        }
        ids.into_iter()
            .filter_map(|id| values.get(&id).map(|v| (id.clone(), v.clone())))
            .collect()
    }

    /// Evaluates a transform with `value` bound. A transform that names a
    /// registered helper calls it with `value` as the only argument.
    fn run_transform(
        &self,
        transform: &str,
        value: Value,
        values: &Map<String, Value>,
    ) -> Result<Option<Value>, EvalError> {
        let name = transform.trim();
        if self.evaluator.helpers().contains(name) {
            return self.evaluator.call_helper(name, &[Some(value)]);
        }
        let scope = Scope::new(values).with_var("value", Some(value));
        self.evaluator.evaluate(transform, &scope)
    }

    /// Applies the source's optional transform to a fetched value.
    async fn apply_transform(&self, source: &DataSource, raw: Value) -> Result<Value, EvalError> {
        let Some(transform) = source.transform() else {
            return Ok(raw);
        };
        let values = self.context.read().await.values().clone();
        Ok(self
            .run_transform(transform, raw, &values)?
            .unwrap_or_else(|| source.default_or_null()))
    }

    async fn ask_ai(
        &self,
        source: &DataSource,
        prompt: &str,
        values: &Map<String, Value>,
    ) -> Result<Value, String> {
        let Some(ai) = self.collaborators.ai.clone() else {
            return Err("no ai client configured".to_string());
        };
        let scope = Scope::new(values);
        let text = self
            .evaluator
            .interpolate(prompt, &scope)
            .map_err(|e| e.to_string())?;
        let text = display(text.as_ref());
        debug!(source = %source.id, "sending ai prompt");
        let call = async move { ai.complete(&text).await.map(Some).map_err(|e| e.to_string()) };
        match self.coalesced(&source.id, call.boxed()).await? {
            Some(reply) => Ok(reply),
            None => Ok(Value::Null),
        }
    }

    /// Reads a fetched source through its collaborator.
    async fn fetch(&self, source: &DataSource) -> FetchResult {
        let call: BoxFuture<'static, FetchResult> = match &source.kind {
            SourceKind::Kv { key, .. } => {
                let store = self.collaborators.store.clone();
                let key = key.clone();
                async move { store.get(&key).await.map_err(|e| e.to_string()) }.boxed()
            }
            SourceKind::Api {
                endpoint, method, ..
            } => {
                let Some(http) = self.collaborators.http.clone() else {
                    return Err("no http client configured".to_string());
                };
                let endpoint = endpoint.clone();
                let method = method.unwrap_or_default();
                async move {
                    http.request(&endpoint, method, None)
                        .await
                        .map(Some)
                        .map_err(|e| e.to_string())
                }
                .boxed()
            }
            _ => return Ok(None),
        };
        self.coalesced(&source.id, call).await
    }

    /// Runs `call` under the fetch timeout, joining an identical call for
    /// `id` if one is already in flight.
    pub(crate) async fn coalesced(
        &self,
        id: &str,
        call: BoxFuture<'static, FetchResult>,
    ) -> FetchResult {
        let timeout = self.config.fetch_timeout();
        let shared = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(id) {
                Some(existing) => {
                    debug!(source = id, "joining in-flight fetch");
                    existing.clone()
                }
                None => {
                    let timed = async move {
                        match tokio::time::timeout(timeout, call).await {
                            Ok(result) => result,
                            Err(_) => Err(CollaboratorError::TIMEOUT.to_string()),
                        }
                    }
                    .boxed()
                    .shared();
                    inflight.insert(id.to_string(), timed.clone());
                    timed
                }
            }
        };

        let result = shared.clone().await;

        let mut inflight = self.inflight.lock().await;
        if inflight.get(id).is_some_and(|f| f.ptr_eq(&shared)) {
            inflight.remove(id);
        }
        result
    }
}

fn settle_into(ctx: &mut Context, source: &DataSource, outcome: Result<Value, String>) -> Written {
    match outcome {
        Ok(value) => ctx.write(&source.id, value, SourceState::Ready),
        Err(error) => {
            warn!(source = %source.id, kind = source.type_name(), %error, "data source failed");
            ctx.forget_inputs(&source.id);
            ctx.write(&source.id, source.default_or_null(), SourceState::Failed { error })
        }
    }
}

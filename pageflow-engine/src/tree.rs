//! Component tree resolution: registry lookup, conditional inclusion,
//! bindings and event wiring.

use crate::context::ContextSnapshot;
use crate::error::{ActionResult, UnknownComponentError};
use crate::registry::ComponentRegistry;
use async_trait::async_trait;
use pageflow_expr::{Evaluator, Scope, has_placeholders, lookup_path};
use pageflow_model::{Binding, ComponentNode, EventHandler};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Entry point back into the action executor for bound events.
#[async_trait]
pub trait ActionDispatch: Send + Sync {
    /// Runs `action_id` with `payload` merged over the action's own payload.
    /// `event` is the raw event data, visible to payload templates as `event`.
    async fn dispatch(
        &self,
        action_id: &str,
        payload: Map<String, Value>,
        event: Value,
    ) -> ActionResult<()>;
}

/// An event handler wired to the executor.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundEvent {
    pub event: String,
    pub action_id: String,
    pub params: Map<String, Value>,
    #[serde(skip)]
    dispatcher: Arc<dyn ActionDispatch>,
}

impl fmt::Debug for BoundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundEvent")
            .field("event", &self.event)
            .field("action_id", &self.action_id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl BoundEvent {
    fn new(handler: &EventHandler, dispatcher: Arc<dyn ActionDispatch>) -> Self {
        Self {
            event: handler.event.clone(),
            action_id: handler.action_id.clone(),
            params: handler.params.clone(),
            dispatcher,
        }
    }

    /// Fires the bound action. Object event data is merged over the
    /// handler's params to form the payload overrides.
    pub async fn fire(&self, event_data: Value) -> ActionResult<()> {
        let mut payload = self.params.clone();
        if let Value::Object(fields) = &event_data {
            payload.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        debug!(event = %self.event, action = %self.action_id, "firing bound event");
        self.dispatcher
            .dispatch(&self.action_id, payload, event_data)
            .await
    }
}

/// A node ready for the host's renderer.
#[derive(Debug, Clone, Serialize)]
pub struct RenderNode {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    pub props: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<BoundEvent>,
}

impl RenderNode {
    /// Pre-order search by node id.
    pub fn find(&self, id: &str) -> Option<&RenderNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn event(&self, name: &str) -> Option<&BoundEvent> {
        self.events.iter().find(|e| e.event == name)
    }
}

/// Result of one render pass.
///
/// Unknown component types drop their own subtree only; everything else
/// still renders and the failures are listed in `errors`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderOutput {
    pub nodes: Vec<RenderNode>,
    #[serde(skip)]
    pub errors: Vec<UnknownComponentError>,
}

impl RenderOutput {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Pre-order search across every root.
    pub fn find(&self, id: &str) -> Option<&RenderNode> {
        self.nodes.iter().find_map(|n| n.find(id))
    }

    /// The rendered nodes, or the first unknown component error.
    pub fn into_result(self) -> Result<Vec<RenderNode>, UnknownComponentError> {
        match self.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.nodes),
        }
    }
}

/// Walks component trees against a fixed context snapshot.
pub struct TreeResolver<'a> {
    context: &'a ContextSnapshot,
    registry: &'a ComponentRegistry,
    evaluator: &'a Evaluator,
    dispatcher: Arc<dyn ActionDispatch>,
}

impl<'a> TreeResolver<'a> {
    pub fn new(
        context: &'a ContextSnapshot,
        registry: &'a ComponentRegistry,
        evaluator: &'a Evaluator,
        dispatcher: Arc<dyn ActionDispatch>,
    ) -> Self {
        Self {
            context,
            registry,
            evaluator,
            dispatcher,
        }
    }

    pub fn resolve(&self, nodes: &[ComponentNode]) -> RenderOutput {
        let mut output = RenderOutput::default();
        output.nodes = self.resolve_nodes(nodes, &mut output.errors);
        output
    }

    fn resolve_nodes(
        &self,
        nodes: &[ComponentNode],
        errors: &mut Vec<UnknownComponentError>,
    ) -> Vec<RenderNode> {
        nodes
            .iter()
            .filter_map(|node| self.resolve_node(node, errors))
            .collect()
    }

    fn resolve_node(
        &self,
        node: &ComponentNode,
        errors: &mut Vec<UnknownComponentError>,
    ) -> Option<RenderNode> {
        if let Some(condition) = &node.condition {
            if !self.condition_holds(&node.id, condition) {
                debug!(node = %node.id, %condition, "condition is falsy, excluding subtree");
                return None;
            }
        }

        let Some(renderer) = self.registry.lookup(&node.component_type) else {
            warn!(node = %node.id, component = %node.component_type, "unknown component type");
            errors.push(UnknownComponentError {
                type_name: node.component_type.clone(),
                node_id: node.id.clone(),
            });
            return None;
        };

        let mut props = renderer.default_props();
        for (key, value) in &node.props {
            match self.static_prop(&node.id, key, value) {
                Some(v) => {
                    props.insert(key.clone(), v);
                }
                None => {
                    props.remove(key);
                }
            }
        }
        for binding in &node.bindings {
            match self.bound_value(&node.id, binding) {
                Some(v) => {
                    props.insert(binding.target.clone(), v);
                }
                None => {
                    props.remove(&binding.target);
                }
            }
        }

        let events = node
            .events
            .iter()
            .map(|handler| BoundEvent::new(handler, Arc::clone(&self.dispatcher)))
            .collect();

        Some(RenderNode {
            id: node.id.clone(),
            component_type: node.component_type.clone(),
            props,
            children: self.resolve_nodes(&node.children, errors),
            events,
        })
    }

    fn scope(&self) -> Scope<'_> {
        Scope::new(self.context.values())
    }

    fn condition_holds(&self, node_id: &str, condition: &str) -> bool {
        match self.evaluator.test(condition, &self.scope()) {
            Ok(holds) => holds,
            Err(e) => {
                warn!(node = node_id, error = %e, "condition failed, treating as false");
                false
            }
        }
    }

    /// Interpolates `${}` placeholders in string props. `None` drops the prop.
    fn static_prop(&self, node_id: &str, key: &str, value: &Value) -> Option<Value> {
        let Value::String(text) = value else {
            return Some(value.clone());
        };
        if !has_placeholders(text) {
            return Some(value.clone());
        }
        match self.evaluator.interpolate(text, &self.scope()) {
            Ok(v) => v,
            Err(e) => {
                warn!(node = node_id, prop = key, error = %e, "prop interpolation failed");
                None
            }
        }
    }

    /// Path lookup plus optional transform. `None` is `undefined`.
    fn bound_value(&self, node_id: &str, binding: &Binding) -> Option<Value> {
        let raw = lookup_path(&binding.source, self.context.values()).cloned();
        let Some(transform) = binding.transform.as_deref() else {
            return raw;
        };
        let result = if self.evaluator.helpers().contains(transform.trim()) {
            self.evaluator.call_helper(transform.trim(), &[raw])
        } else {
            let scope = self.scope().with_var("value", raw);
            self.evaluator.evaluate(transform, &scope)
        };
        match result {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    node = node_id,
                    source = %binding.source,
                    target = %binding.target,
                    error = %e,
                    "binding transform failed, prop left undefined"
                );
                None
            }
        }
    }
}

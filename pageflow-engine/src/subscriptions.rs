//! Which component nodes read which data sources.
//!
//! A node subscribes to the root id of every binding source plus every
//! context id its binding transforms, condition and interpolated props
//! reference. After a recompute only subscribers of changed ids are
//! reported as affected.

use pageflow_expr::{Evaluator, placeholders};
use pageflow_model::ComponentNode;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Variables bound by the engine rather than read from Context.
const SCOPE_VARS: [&str; 3] = ["value", "event", "payload"];

#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    by_source: BTreeMap<String, BTreeSet<String>>,
    by_node: BTreeMap<String, BTreeSet<String>>,
}

impl Subscriptions {
    pub fn build(nodes: &[ComponentNode], evaluator: &Evaluator) -> Self {
        let mut subs = Self::default();
        for root in nodes {
            for node in root.iter() {
                for source in reads_of(node, evaluator) {
                    subs.by_source
                        .entry(source.clone())
                        .or_default()
                        .insert(node.id.clone());
                    subs.by_node.entry(node.id.clone()).or_default().insert(source);
                }
            }
        }
        debug!(nodes = subs.by_node.len(), sources = subs.by_source.len(), "built subscriptions");
        subs
    }

    /// Node ids that read `source`.
    pub fn subscribers(&self, source: &str) -> BTreeSet<String> {
        self.by_source.get(source).cloned().unwrap_or_default()
    }

    /// Data source ids read by `node`.
    pub fn sources_of(&self, node: &str) -> BTreeSet<String> {
        self.by_node.get(node).cloned().unwrap_or_default()
    }

    /// Union of the subscribers of every id in `changed`.
    pub fn affected<'a>(&self, changed: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
        changed
            .into_iter()
            .filter_map(|id| self.by_source.get(id))
            .flatten()
            .cloned()
            .collect()
    }
}

fn reads_of(node: &ComponentNode, evaluator: &Evaluator) -> BTreeSet<String> {
    let mut reads = BTreeSet::new();
    for binding in &node.bindings {
        if let Some(root) = binding_root(&binding.source) {
            reads.insert(root);
        }
        if let Some(transform) = &binding.transform {
            expression_roots(transform, evaluator, &mut reads);
        }
    }
    if let Some(condition) = &node.condition {
        expression_roots(condition, evaluator, &mut reads);
    }
    for value in node.props.values() {
        if let Value::String(text) = value {
            for expr in placeholders(text) {
                expression_roots(expr, evaluator, &mut reads);
            }
        }
    }
    reads
}

/// First path segment of a binding source, skipping a `context.` prefix.
fn binding_root(source: &str) -> Option<String> {
    let mut segments = source.split(['.', '[']).filter(|s| !s.is_empty());
    let first = segments.next()?;
    let root = if first == "context" { segments.next()? } else { first };
    Some(root.to_string())
}

fn expression_roots(expr: &str, evaluator: &Evaluator, out: &mut BTreeSet<String>) {
    if evaluator.helpers().contains(expr.trim()) {
        return;
    }
    match evaluator.compile(expr) {
        Ok(compiled) => out.extend(
            compiled
                .referenced_roots()
                .into_iter()
                .filter(|name| !SCOPE_VARS.contains(&name.as_str())),
        ),
        Err(e) => debug!(expr, error = %e, "skipping unparsable expression in subscriptions"),
    }
}

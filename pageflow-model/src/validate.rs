//! Structural validation of a parsed page schema.
//!
//! Reports every reference problem at once instead of stopping at the first,
//! so a schema author sees the full list in one pass.

use crate::{ActionKind, PageSchema, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A single structural defect found in a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIssue {
    pub kind: IssueKind,
    pub message: String,
}

impl SchemaIssue {
    fn new(kind: IssueKind, message: String) -> Self {
        Self { kind, message }
    }
}

/// Category of a [`SchemaIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DuplicateSourceId,
    DuplicateActionId,
    DuplicateComponentId,
    UnknownDependency,
    UnknownChainTarget,
    UnknownEventAction,
    MissingActionTarget,
    UnknownActionTarget,
    MissingHandler,
    EmptyTransform,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueKind::DuplicateSourceId => "duplicate_source_id",
            IssueKind::DuplicateActionId => "duplicate_action_id",
            IssueKind::DuplicateComponentId => "duplicate_component_id",
            IssueKind::UnknownDependency => "unknown_dependency",
            IssueKind::UnknownChainTarget => "unknown_chain_target",
            IssueKind::UnknownEventAction => "unknown_event_action",
            IssueKind::MissingActionTarget => "missing_action_target",
            IssueKind::UnknownActionTarget => "unknown_action_target",
            IssueKind::MissingHandler => "missing_handler",
            IssueKind::EmptyTransform => "empty_transform",
        };
        f.write_str(s)
    }
}

/// Checks ids and cross-references. Returns an empty vec for a well-formed schema.
pub fn validate_schema(schema: &PageSchema) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();

    // ── Data sources ─────────────────────────────────────────────
    let mut source_ids = HashSet::new();
    for ds in &schema.data_sources {
        if !source_ids.insert(ds.id.as_str()) {
            issues.push(SchemaIssue::new(
                IssueKind::DuplicateSourceId,
                format!("data source '{}' is declared more than once", ds.id),
            ));
        }
        if let SourceKind::Computed { transform } = &ds.kind {
            if transform.trim().is_empty() {
                issues.push(SchemaIssue::new(
                    IssueKind::EmptyTransform,
                    format!("computed data source '{}' has an empty transform", ds.id),
                ));
            }
        }
    }
    for ds in &schema.data_sources {
        for dep in &ds.dependencies {
            if !source_ids.contains(dep.as_str()) {
                issues.push(SchemaIssue::new(
                    IssueKind::UnknownDependency,
                    format!("data source '{}' depends on undeclared '{}'", ds.id, dep),
                ));
            }
        }
    }

    // ── Actions ──────────────────────────────────────────────────
    let mut action_ids = HashSet::new();
    for action in &schema.actions {
        if !action_ids.insert(action.id.as_str()) {
            issues.push(SchemaIssue::new(
                IssueKind::DuplicateActionId,
                format!("action '{}' is declared more than once", action.id),
            ));
        }
    }
    for action in &schema.actions {
        match &action.target {
            Some(target) if !source_ids.contains(target.as_str()) => {
                issues.push(SchemaIssue::new(
                    IssueKind::UnknownActionTarget,
                    format!("action '{}' targets undeclared data source '{}'", action.id, target),
                ));
            }
            None if action.kind.requires_target() => {
                issues.push(SchemaIssue::new(
                    IssueKind::MissingActionTarget,
                    format!("{} action '{}' has no target", action.kind, action.id),
                ));
            }
            _ => {}
        }
        if action.kind == ActionKind::Custom && action.handler.is_none() {
            issues.push(SchemaIssue::new(
                IssueKind::MissingHandler,
                format!("custom action '{}' names no handler", action.id),
            ));
        }
        for next in action.on_success.iter().chain(action.on_error.iter()) {
            if !action_ids.contains(next.as_str()) {
                issues.push(SchemaIssue::new(
                    IssueKind::UnknownChainTarget,
                    format!("action '{}' chains to undeclared action '{}'", action.id, next),
                ));
            }
        }
    }

    // ── Components ───────────────────────────────────────────────
    let mut component_ids = HashSet::new();
    for node in schema.all_components() {
        if !component_ids.insert(node.id.as_str()) {
            issues.push(SchemaIssue::new(
                IssueKind::DuplicateComponentId,
                format!("component id '{}' is used more than once", node.id),
            ));
        }
        for handler in &node.events {
            if !action_ids.contains(handler.action_id.as_str()) {
                issues.push(SchemaIssue::new(
                    IssueKind::UnknownEventAction,
                    format!(
                        "component '{}' maps {} to undeclared action '{}'",
                        node.id, handler.event, handler.action_id
                    ),
                ));
            }
        }
    }

    issues
}

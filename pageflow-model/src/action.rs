use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A declarative side effect, triggered by an event or by another action's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Data source id the action writes to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
    /// Custom handler name, only meaningful for `custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
}

impl Action {
    /// Shorthand for an action with no target, payload or chain.
    pub fn new(id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            target: None,
            payload: Map::new(),
            handler: None,
            on_success: None,
            on_error: None,
        }
    }
}

/// The operation an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    Navigate,
    Api,
    Custom,
}

impl ActionKind {
    /// `create`, `update` and `delete` cannot run without a target.
    pub fn requires_target(&self) -> bool {
        matches!(self, ActionKind::Create | ActionKind::Update | ActionKind::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::Navigate => "navigate",
            ActionKind::Api => "api",
            ActionKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

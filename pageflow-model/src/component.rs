use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node of a page's component tree.
///
/// `component_type` is a name resolved through the host's component
/// registry; the model itself attaches no meaning to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNode {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ComponentNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventHandler>,
    /// Inclusion predicate; falsy removes the node and its subtree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl ComponentNode {
    /// Shorthand for a bare node with no props, bindings or children.
    pub fn new(id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component_type: component_type.into(),
            props: Map::new(),
            children: Vec::new(),
            bindings: Vec::new(),
            events: Vec::new(),
            condition: None,
        }
    }

    /// Depth-first, pre-order iteration over this node and all descendants.
    pub fn iter(&self) -> ComponentIter<'_> {
        ComponentIter { stack: vec![self] }
    }
}

/// Pre-order iterator returned by [`ComponentNode::iter`].
pub struct ComponentIter<'a> {
    stack: Vec<&'a ComponentNode>,
}

impl<'a> Iterator for ComponentIter<'a> {
    type Item = &'a ComponentNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Links a context path to a component prop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Dotted path into the context, e.g. `user.profile.email`.
    pub source: String,
    /// Prop name the bound value is written to.
    pub target: String,
    /// Optional expression applied to the looked-up value (bound as `value`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

/// Maps a UI event name to an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandler {
    /// `onClick`, `onChange`, ...
    pub event: String,
    pub action_id: String,
    /// Merged into the action payload when the event fires.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

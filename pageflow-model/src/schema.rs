use crate::{Action, ComponentNode, DataSource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Highest `schemaVersion` this build reads. Documents that omit the field are version 1.
pub const SCHEMA_VERSION: u32 = 1;

/// A complete page: layout, component tree, data sources, actions and seed data.
///
/// This is the persisted/exchanged artifact. Optional fields are skipped when
/// absent so a load followed by a save keeps the document's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(default)]
    pub components: Vec<ComponentNode>,
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Carried through untouched; hooks are expressed as data sources and actions at runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Value>,
    /// Storage entries written on first load when the key is absent.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub seed_data: Map<String, Value>,
}

impl PageSchema {
    /// Creates an empty schema with the given id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema_version: None,
            id: id.into(),
            name: name.into(),
            layout: None,
            components: Vec::new(),
            data_sources: Vec::new(),
            actions: Vec::new(),
            hooks: None,
            seed_data: Map::new(),
        }
    }

    /// Declared schema version, defaulting to 1.
    pub fn version(&self) -> u32 {
        self.schema_version.unwrap_or(1)
    }

    pub fn data_source(&self, id: &str) -> Option<&DataSource> {
        self.data_sources.iter().find(|ds| ds.id == id)
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Every component node in the page, pre-order.
    pub fn all_components(&self) -> impl Iterator<Item = &ComponentNode> {
        self.components.iter().flat_map(|root| root.iter())
    }

    pub fn find_component(&self, id: &str) -> Option<&ComponentNode> {
        self.all_components().find(|n| n.id == id)
    }

    /// Serializes back to the persisted JSON form.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Page layout descriptor, e.g. `{"type": "grid", "columns": 2}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

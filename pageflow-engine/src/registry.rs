//! Name → renderer lookup owned by the host application.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A component implementation the host can materialize.
///
/// The engine never paints anything; it only needs the name and the props
/// a node starts with before its own props and bindings are applied.
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    fn default_props(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// A renderer that is just a name plus optional default props.
#[derive(Debug, Clone)]
pub struct NamedRenderer {
    name: String,
    default_props: Map<String, Value>,
}

impl NamedRenderer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_props: Map::new(),
        }
    }

    pub fn with_default_props(mut self, props: Map<String, Value>) -> Self {
        self.default_props = props;
        self
    }
}

impl Renderer for NamedRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_props(&self) -> Map<String, Value> {
        self.default_props.clone()
    }
}

#[derive(Clone, Default)]
pub struct ComponentRegistry {
    renderers: HashMap<String, Arc<dyn Renderer>>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("renderers", &self.names())
            .finish()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry where each name maps to a bare [`NamedRenderer`].
    pub fn with_builtin<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for name in names {
            registry.register(Arc::new(NamedRenderer::new(name)));
        }
        registry
    }

    /// Registers `renderer` under its own name, replacing any previous entry.
    pub fn register(&mut self, renderer: Arc<dyn Renderer>) {
        self.renderers.insert(renderer.name().to_string(), renderer);
    }

    pub fn lookup(&self, type_name: &str) -> Option<&Arc<dyn Renderer>> {
        self.renderers.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.renderers.contains_key(type_name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.renderers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}

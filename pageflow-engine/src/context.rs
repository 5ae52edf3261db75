//! The live value mapping from data source id to resolved value.
//!
//! Only the source graph and the action executor write to a [`Context`];
//! everyone else reads [`ContextSnapshot`]s.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Resolution state of one data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SourceState {
    /// Holding its default value, not yet resolved.
    Pending,
    Ready,
    /// Resolution failed; the value is the source's default.
    Failed { error: String },
}

impl SourceState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SourceState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SourceState::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SourceState::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// What a [`Context::write`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Written {
    pub value: bool,
    pub state: bool,
}

impl Written {
    pub fn any(self) -> bool {
        self.value || self.state
    }
}

/// Owned page state. Writes are crate-private.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: Map<String, Value>,
    states: BTreeMap<String, SourceState>,
    /// Inputs each derived source was last computed from.
    inputs: HashMap<String, Value>,
    /// Count of action writes per source. A fetch that started under an
    /// older generation must not overwrite a newer action write.
    generations: HashMap<String, u64>,
    revision: u64,
}

impl Context {
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.values.get(id)
    }

    pub fn state(&self, id: &str) -> Option<&SourceState> {
        self.states.get(id)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Bumped on every write that changes a value or a state.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            values: self.values.clone(),
            states: self.states.clone(),
            revision: self.revision,
        }
    }

    /// Seeds `id` with its default value in the `Pending` state.
    pub(crate) fn init(&mut self, id: &str, default: Value) {
        self.values.insert(id.to_string(), default);
        self.states.insert(id.to_string(), SourceState::Pending);
    }

    /// Stores a value and state, reporting what actually changed.
    pub(crate) fn write(&mut self, id: &str, value: Value, state: SourceState) -> Written {
        let value_changed = self.values.get(id) != Some(&value);
        let state_changed = self.states.get(id) != Some(&state);
        if value_changed {
            self.values.insert(id.to_string(), value);
        }
        if state_changed {
            self.states.insert(id.to_string(), state);
        }
        if value_changed || state_changed {
            self.revision += 1;
        }
        Written {
            value: value_changed,
            state: state_changed,
        }
    }

    /// Writes on behalf of an action, invalidating fetches already in flight
    /// for `id`.
    pub(crate) fn write_from_action(&mut self, id: &str, value: Value, state: SourceState) -> Written {
        *self.generations.entry(id.to_string()).or_default() += 1;
        self.write(id, value, state)
    }

    pub(crate) fn generation(&self, id: &str) -> u64 {
        self.generations.get(id).copied().unwrap_or_default()
    }

    pub(crate) fn last_inputs(&self, id: &str) -> Option<&Value> {
        self.inputs.get(id)
    }

    pub(crate) fn remember_inputs(&mut self, id: &str, inputs: Value) {
        self.inputs.insert(id.to_string(), inputs);
    }

    pub(crate) fn forget_inputs(&mut self, id: &str) {
        self.inputs.remove(id);
    }
}

/// Immutable copy of a [`Context`] at one revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextSnapshot {
    values: Map<String, Value>,
    states: BTreeMap<String, SourceState>,
    revision: u64,
}

impl ContextSnapshot {
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.values.get(id)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn state(&self, id: &str) -> Option<&SourceState> {
        self.states.get(id)
    }

    pub fn states(&self) -> &BTreeMap<String, SourceState> {
        &self.states
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Ids of failed sources with their error reasons.
    pub fn errors(&self) -> BTreeMap<String, String> {
        self.states
            .iter()
            .filter_map(|(id, state)| state.error().map(|e| (id.clone(), e.to_string())))
            .collect()
    }

    /// True when every source has left `Pending`.
    pub fn is_settled(&self) -> bool {
        self.states.values().all(|s| !matches!(s, SourceState::Pending))
    }

    pub fn into_values(self) -> Map<String, Value> {
        self.values
    }
}

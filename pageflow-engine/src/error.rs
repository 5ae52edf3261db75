//! Error types for the engine.

use pageflow_expr::EvalError;
use pageflow_model::ModelError;
use pageflow_storage::StorageError;
use thiserror::Error;

/// Result type for page-level operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for action execution.
pub type ActionResult<T> = Result<T, ActionError>;

/// The data source dependency graph contains at least one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle between data sources: {}", ids.join(", "))]
pub struct CycleError {
    /// Every id on a cycle, sorted.
    pub ids: Vec<String>,
}

/// A component node names a type missing from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown component type '{type_name}' on node '{node_id}'")]
pub struct UnknownComponentError {
    pub type_name: String,
    pub node_id: String,
}

/// Failure reported by an injected collaborator (HTTP, navigation, AI,
/// custom handler).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
}

impl CollaboratorError {
    /// Reason recorded when a call outlives the configured timeout.
    pub const TIMEOUT: &'static str = "timeout";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(Self::TIMEOUT)
    }

    pub fn is_timeout(&self) -> bool {
        self.message == Self::TIMEOUT
    }
}

/// Page-level failures: loading, resolution and teardown.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    UnknownComponent(#[from] UnknownComponentError),

    #[error("schema error: {0}")]
    Schema(#[from] ModelError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("unknown data source '{0}'")]
    UnknownSource(String),

    /// The page instance was torn down.
    #[error("page instance was torn down")]
    Cancelled,
}

/// Failure of a single action invocation.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action '{0}' needs a target data source")]
    MissingTarget(String),

    #[error("action '{action}' targets unknown data source '{target}'")]
    UnknownTarget { action: String, target: String },

    #[error("data source '{target}' is derived and cannot be written by action '{action}'")]
    ReadOnlyTarget { action: String, target: String },

    #[error("action '{action}' needs a {collaborator} but none is configured")]
    MissingCollaborator {
        action: String,
        collaborator: &'static str,
    },

    #[error("no custom handler named '{0}'")]
    UnknownHandler(String),

    #[error("action '{action}' failed: {source}")]
    Collaborator {
        action: String,
        source: CollaboratorError,
    },

    #[error("action '{action}' could not persist: {source}")]
    Storage {
        action: String,
        source: StorageError,
    },

    #[error("action '{action}' payload evaluation failed: {source}")]
    Eval { action: String, source: EvalError },

    #[error("action '{action}' has an invalid payload: {message}")]
    InvalidPayload { action: String, message: String },

    #[error("action chain exceeded depth {limit} at depth {depth}")]
    ChainTooDeep { depth: usize, limit: usize },

    /// Recomputing dependents of the written target failed.
    #[error(transparent)]
    Engine(EngineError),

    #[error("page instance was torn down")]
    Cancelled,
}

impl From<EngineError> for ActionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Cancelled => ActionError::Cancelled,
            other => ActionError::Engine(other),
        }
    }
}

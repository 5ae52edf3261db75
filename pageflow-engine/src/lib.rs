//! Page orchestration engine for pageflow.
//!
//! Turns a [`PageSchema`](pageflow_model::PageSchema) into a live page:
//!
//! - **Data source graph**: dependency DAG over data sources, resolved in
//!   topological order, with recomputation of derived sources when an
//!   upstream value changes
//! - **Component tree resolver**: registry lookup, conditional inclusion,
//!   bindings and event wiring against a read-only Context snapshot
//! - **Action executor**: create/update/delete/navigate/api/custom actions
//!   with `onSuccess`/`onError` chaining
//!
//! # Architecture
//!
//! A [`PageRuntime`] owns one page instance. Everything external (storage,
//! HTTP, navigation, AI, custom handlers) is injected through
//! [`Collaborators`]; component renderers come from a [`ComponentRegistry`].
//! Only the graph and the executor write the Context. Consumers read
//! [`ContextSnapshot`]s and may [`subscribe`](PageRuntime::subscribe) to
//! [`ContextChange`] notifications naming the component nodes affected by
//! each change.
//!
//! # Example
//!
//! ```no_run
//! use pageflow_engine::{Collaborators, ComponentRegistry, EngineConfig, PageRuntime};
//! use serde_json::Map;
//!
//! # async fn run(json: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ComponentRegistry::with_builtin(["Card", "Button", "Text"]);
//! let page = PageRuntime::from_json(json, registry, Collaborators::default(), EngineConfig::default()).await?;
//! page.resolve_all().await?;
//! let output = page.render().await;
//! page.execute("add-todo", Map::new()).await?;
//! # let _ = output;
//! # Ok(())
//! # }
//! ```

mod actions;
pub mod collaborators;
mod config;
mod context;
mod error;
mod graph;
mod registry;
mod runtime;
mod sources;
mod subscriptions;
mod tree;

pub use actions::{ActionState, ActionStep, ActionTrace};
pub use collaborators::{
    AiClient, CollaboratorResult, Collaborators, CustomHandler, FnHandler, HandlerTable,
    HttpClient, NavigationTarget, Navigator, ReqwestHttpClient,
};
pub use config::EngineConfig;
pub use context::{Context, ContextSnapshot, SourceState};
pub use error::{
    ActionError, ActionResult, CollaboratorError, CycleError, EngineError, EngineResult,
    UnknownComponentError,
};
pub use graph::SourceGraph;
pub use registry::{ComponentRegistry, NamedRenderer, Renderer};
pub use runtime::{ContextChange, PageRuntime};
pub use subscriptions::Subscriptions;
pub use tree::{ActionDispatch, BoundEvent, RenderNode, RenderOutput, TreeResolver};

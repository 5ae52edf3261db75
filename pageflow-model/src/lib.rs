//! Page schema model for pageflow.
//!
//! Defines the declarative types a page is built from:
//! - [`PageSchema`]: the persisted JSON document that owns everything else
//! - [`DataSource`] / [`SourceKind`]: named slots of page state (static, kv, api, computed, ai)
//! - [`ComponentNode`] / [`Binding`] / [`EventHandler`]: the component tree
//! - [`Action`] / [`ActionKind`]: declarative side effects with success/error chaining
//!
//! Loading goes through [`load_page_schema`], which parses the JSON, checks
//! the `schemaVersion`, and runs [`validate_schema`]. Dependency cycles are
//! not detected here; the engine's data source graph owns that check.

mod action;
mod component;
mod error;
mod ids;
mod schema;
mod source;
mod validate;

pub use action::{Action, ActionKind};
pub use component::{Binding, ComponentIter, ComponentNode, EventHandler};
pub use error::{ModelError, ModelResult};
pub use ids::PageInstanceId;
pub use schema::{Layout, PageSchema, SCHEMA_VERSION};
pub use source::{DataSource, HttpMethod, SourceKind};
pub use validate::{IssueKind, SchemaIssue, validate_schema};

/// Parses a page schema document and checks it for structural defects.
pub fn load_page_schema(json: &str) -> ModelResult<PageSchema> {
    let schema: PageSchema = serde_json::from_str(json)?;

    let version = schema.version();
    if version > SCHEMA_VERSION {
        return Err(ModelError::UnsupportedVersion {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    let issues = validate_schema(&schema);
    if !issues.is_empty() {
        return Err(ModelError::Invalid(issues));
    }
    Ok(schema)
}

//! Error types for schema loading.

use crate::validate::SchemaIssue;
use thiserror::Error;

/// Result type for schema operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while loading a page schema.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The document is not valid JSON or does not match the schema shape.
    #[error("schema parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The document declares a `schemaVersion` this build does not understand.
    #[error("unsupported schema version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The document parsed but references are inconsistent.
    #[error("invalid page schema:\n{}", format_issues(.0))]
    Invalid(Vec<SchemaIssue>),
}

fn format_issues(issues: &[SchemaIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  [{}] {}", i.kind, i.message))
        .collect::<Vec<_>>()
        .join("\n")
}

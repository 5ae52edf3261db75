use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A named, typed slot of page state.
///
/// The `type` discriminator and the per-type coordinates live in
/// [`SourceKind`]; it is flattened so the JSON stays a single flat object:
/// `{"id": "todos", "type": "kv", "key": "app-todos", "defaultValue": []}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: String,
    #[serde(flatten)]
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl DataSource {
    /// The value this source holds before (or instead of) a successful resolution.
    pub fn default_or_null(&self) -> Value {
        self.default_value.clone().unwrap_or(Value::Null)
    }

    /// Whether the value is derived from other sources rather than fetched.
    pub fn is_derived(&self) -> bool {
        matches!(self.kind, SourceKind::Computed { .. } | SourceKind::Ai { .. })
    }

    /// The transform expression or helper name, if this kind carries one.
    pub fn transform(&self) -> Option<&str> {
        match &self.kind {
            SourceKind::Static { .. } => None,
            SourceKind::Kv { transform, .. }
            | SourceKind::Api { transform, .. }
            | SourceKind::Ai { transform, .. } => transform.as_deref(),
            SourceKind::Computed { transform } => Some(transform),
        }
    }

    /// Lowercase type tag as it appears in the schema.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            SourceKind::Static { .. } => "static",
            SourceKind::Kv { .. } => "kv",
            SourceKind::Api { .. } => "api",
            SourceKind::Computed { .. } => "computed",
            SourceKind::Ai { .. } => "ai",
        }
    }
}

/// Where a data source's value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceKind {
    /// A literal value declared inline (falls back to `defaultValue`).
    Static {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    /// A value read from the key-value storage collaborator.
    Kv {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<String>,
    },
    /// A value fetched from the HTTP collaborator.
    Api {
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<HttpMethod>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<String>,
    },
    /// A pure function of the declared dependencies.
    Computed { transform: String },
    /// Like `computed`, optionally routed through an AI completion first.
    Ai {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
}

/// HTTP verbs accepted by `api` sources and actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Case-insensitive parse, used for method names that arrive in payloads.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

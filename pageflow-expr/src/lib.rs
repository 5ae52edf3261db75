//! Sandboxed expression language for pageflow bindings, transforms and
//! conditions.
//!
//! Expressions are a small side-effect-free subset of JavaScript: literals,
//! property access (including `?.`), arithmetic, comparison, logic, the
//! ternary operator, template literals, whitelisted array/string methods
//! with arrow-function callbacks, and named helpers from a
//! [`HelperRegistry`]. Nothing outside the supplied [`Scope`] is reachable.
//!
//! ```
//! use pageflow_expr::{Evaluator, Scope};
//! use serde_json::{json, Map};
//!
//! let ctx = Map::new();
//! let scope = Scope::new(&ctx).with_var("value", Some(json!([1, 2, 3])));
//! let out = Evaluator::new().evaluate("value.length + ' files'", &scope).unwrap();
//! assert_eq!(out, Some(json!("3 files")));
//! ```

mod ast;
mod error;
mod helpers;
mod interp;
mod lexer;
mod parser;
mod path;
mod template;
mod value;

pub use ast::{BinaryOp, Expr, LogicalOp, TemplatePart, UnaryOp};
pub use error::{EvalError, EvalResult};
pub use helpers::{HelperFn, HelperRegistry};
pub use interp::{DEFAULT_MAX_DEPTH, Evaluator, Expression, Scope};
pub use path::lookup_path;
pub use template::{has_placeholders, placeholders};
pub use value::{display, loose_equals, number, strict_equals, to_number, truthy, type_name};

use serde_json::{Map, Value};

/// Evaluates `expr` against `context` with the default helpers.
pub fn evaluate(expr: &str, context: &Map<String, Value>) -> EvalResult<Option<Value>> {
    Evaluator::new().evaluate(expr, &Scope::new(context))
}

/// Substitutes `${...}` placeholders in `text` against `context`.
pub fn interpolate(text: &str, context: &Map<String, Value>) -> EvalResult<Option<Value>> {
    Evaluator::new().interpolate(text, &Scope::new(context))
}

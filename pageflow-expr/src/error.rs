//! Error types for expression evaluation.

use thiserror::Error;

/// Result type for evaluator operations.
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors raised while parsing or evaluating an expression.
///
/// Every variant carries the source text of the expression that failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("parse error in `{expr}` at offset {offset}: {message}")]
    Parse {
        expr: String,
        offset: usize,
        message: String,
    },

    #[error("unknown identifier '{name}' in `{expr}`")]
    UnknownIdentifier { expr: String, name: String },

    #[error("type mismatch in `{expr}` at {path}: {message}")]
    TypeMismatch {
        expr: String,
        path: String,
        message: String,
    },

    #[error("unknown helper '{name}' in `{expr}`")]
    UnknownHelper { expr: String, name: String },

    #[error("unsupported method '{method}' on {receiver} in `{expr}`")]
    UnknownMethod {
        expr: String,
        method: String,
        receiver: String,
    },

    #[error("division by zero in `{expr}`")]
    DivisionByZero { expr: String },

    #[error("`{expr}` exceeds the nesting limit of {limit}")]
    TooDeep { expr: String, limit: usize },

    #[error("helper '{name}' failed in `{expr}`: {message}")]
    Helper {
        expr: String,
        name: String,
        message: String,
    },
}

impl EvalError {
    /// The expression text the error was raised for.
    pub fn expr(&self) -> &str {
        match self {
            EvalError::Parse { expr, .. }
            | EvalError::UnknownIdentifier { expr, .. }
            | EvalError::TypeMismatch { expr, .. }
            | EvalError::UnknownHelper { expr, .. }
            | EvalError::UnknownMethod { expr, .. }
            | EvalError::DivisionByZero { expr }
            | EvalError::TooDeep { expr, .. }
            | EvalError::Helper { expr, .. } => expr,
        }
    }
}

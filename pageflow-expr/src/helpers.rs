//! Named helper functions callable from expressions.
//!
//! Free function calls such as `sum(prices)` resolve only against this
//! table; there is no other way for an expression to reach host code.

use crate::value::{number, to_number, type_name};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A pure host function. Arguments and return use `None` for `undefined`.
pub type HelperFn = Arc<dyn Fn(&[Option<Value>]) -> Result<Option<Value>, String> + Send + Sync>;

/// Name → helper lookup table.
#[derive(Clone, Default)]
pub struct HelperRegistry {
    helpers: HashMap<String, HelperFn>,
}

impl fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.helpers.keys().collect();
        names.sort();
        f.debug_struct("HelperRegistry").field("helpers", &names).finish()
    }
}

impl HelperRegistry {
    /// An empty registry. Expressions evaluated against it cannot call anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with `sum`, `min`, `max`, `round`, `keys`,
    /// `values`, `count` and `len`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("sum", |args| {
            Ok(Some(number(numbers(args)?.iter().sum())))
        });
        registry.register("min", |args| {
            Ok(numbers(args)?.into_iter().reduce(f64::min).map(number))
        });
        registry.register("max", |args| {
            Ok(numbers(args)?.into_iter().reduce(f64::max).map(number))
        });
        registry.register("round", |args| {
            let n = to_number(arg(args, 0)).ok_or("round expects a number")?;
            let digits = to_number(arg(args, 1)).unwrap_or(0.0).clamp(0.0, 15.0) as i32;
            let factor = 10f64.powi(digits);
            Ok(Some(number((n * factor).round() / factor)))
        });
        registry.register("keys", |args| match arg(args, 0) {
            Some(Value::Object(map)) => Ok(Some(Value::Array(
                map.keys().map(|k| Value::String(k.clone())).collect(),
            ))),
            other => Err(format!("keys expects an object, got {}", type_name(other))),
        });
        registry.register("values", |args| match arg(args, 0) {
            Some(Value::Object(map)) => Ok(Some(Value::Array(map.values().cloned().collect()))),
            other => Err(format!("values expects an object, got {}", type_name(other))),
        });
        registry.register("count", |args| match arg(args, 0) {
            Some(Value::Array(items)) => Ok(Some(number(items.len() as f64))),
            None | Some(Value::Null) => Ok(Some(number(0.0))),
            other => Err(format!("count expects an array, got {}", type_name(other))),
        });
        registry.register("len", |args| match arg(args, 0) {
            Some(Value::Array(items)) => Ok(Some(number(items.len() as f64))),
            Some(Value::String(s)) => Ok(Some(number(s.chars().count() as f64))),
            Some(Value::Object(map)) => Ok(Some(number(map.len() as f64))),
            other => Err(format!("len expects an array, string or object, got {}", type_name(other))),
        });
        registry
    }

    /// Registers (or replaces) a helper.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Option<Value>]) -> Result<Option<Value>, String> + Send + Sync + 'static,
    {
        self.helpers.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&HelperFn> {
        self.helpers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }
}

fn arg(args: &[Option<Value>], idx: usize) -> Option<&Value> {
    args.get(idx).and_then(Option::as_ref)
}

/// Flattens `f(1, 2, 3)` and `f([1, 2, 3])` into a list of numbers.
fn numbers(args: &[Option<Value>]) -> Result<Vec<f64>, String> {
    let mut out = Vec::new();
    for value in args {
        match value {
            Some(Value::Array(items)) => {
                for item in items {
                    out.push(item.as_f64().ok_or_else(|| {
                        format!("expected numbers, found {}", type_name(Some(item)))
                    })?);
                }
            }
            Some(Value::Number(n)) => out.push(n.as_f64().unwrap_or(f64::NAN)),
            other => return Err(format!("expected numbers, found {}", type_name(other.as_ref()))),
        }
    }
    Ok(out)
}

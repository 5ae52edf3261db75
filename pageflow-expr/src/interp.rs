//! Tree-walking interpreter.
//!
//! The interpreter only sees what the [`Scope`] hands it: context entries,
//! explicitly bound variables and arrow parameters. Calls go either to the
//! whitelisted methods below or to the [`HelperRegistry`].

use crate::ast::{BinaryOp, Expr, LogicalOp, TemplatePart, UnaryOp};
use crate::error::{EvalError, EvalResult};
use crate::helpers::HelperRegistry;
use crate::parser::parse;
use crate::path::step;
use crate::template::{Segment, split_template};
use crate::value::{
    display, loose_equals, number, strict_equals, to_number, truthy, type_name,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

/// Default nesting limit for parsing and evaluation.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Read-only bindings an expression is evaluated against.
///
/// Free identifiers resolve, in order, to: arrow parameters, variables
/// bound with [`Scope::with_var`], the whole context (`context`), and
/// finally context entries by id.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    context: &'a Map<String, Value>,
    vars: Vec<(String, Option<Value>)>,
}

impl<'a> Scope<'a> {
    pub fn new(context: &'a Map<String, Value>) -> Self {
        Self {
            context,
            vars: Vec::new(),
        }
    }

    /// Binds an extra variable such as `value` or `event`. `None` binds `undefined`.
    pub fn with_var(mut self, name: impl Into<String>, value: Option<Value>) -> Self {
        self.vars.push((name.into(), value));
        self
    }

    pub fn context(&self) -> &'a Map<String, Value> {
        self.context
    }

    fn var(&self, name: &str) -> Option<&Option<Value>> {
        self.vars.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A parsed expression that can be evaluated repeatedly.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Context ids (and bound variable names) the expression reads.
    pub fn referenced_roots(&self) -> BTreeSet<String> {
        self.ast.free_identifiers()
    }
}

/// Sandboxed evaluator. Holds no mutable state; results depend only on
/// the expression and the scope.
#[derive(Debug, Clone)]
pub struct Evaluator {
    helpers: Arc<HelperRegistry>,
    max_depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// Evaluator with the default helper set.
    pub fn new() -> Self {
        Self::with_helpers(HelperRegistry::with_defaults())
    }

    pub fn with_helpers(helpers: HelperRegistry) -> Self {
        Self {
            helpers: Arc::new(helpers),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Overrides the nesting limit applied to parsing and evaluation.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn compile(&self, source: &str) -> EvalResult<Expression> {
        Ok(Expression {
            source: source.to_string(),
            ast: parse(source, self.max_depth)?,
        })
    }

    /// Parses and evaluates `source`. `Ok(None)` is `undefined`.
    pub fn evaluate(&self, source: &str, scope: &Scope<'_>) -> EvalResult<Option<Value>> {
        let expr = self.compile(source)?;
        let result = self.eval(&expr, scope);
        if let Err(e) = &result {
            trace!(expr = source, error = %e, "expression failed");
        }
        result
    }

    pub fn eval(&self, expr: &Expression, scope: &Scope<'_>) -> EvalResult<Option<Value>> {
        let mut interp = Interp {
            source: &expr.source,
            scope,
            helpers: &self.helpers,
            locals: Vec::new(),
            depth: 0,
            max_depth: self.max_depth,
        };
        interp.eval(&expr.ast)
    }

    /// Evaluates `source` and applies JavaScript truthiness.
    pub fn test(&self, source: &str, scope: &Scope<'_>) -> EvalResult<bool> {
        Ok(truthy(self.evaluate(source, scope)?.as_ref()))
    }

    /// Substitutes every `${expr}` in `template`.
    ///
    /// Text without placeholders is returned unchanged. A template made of
    /// exactly one placeholder yields the raw value rather than its string form.
    pub fn interpolate(&self, template: &str, scope: &Scope<'_>) -> EvalResult<Option<Value>> {
        let segments = split_template(template).map_err(|offset| EvalError::Parse {
            expr: template.to_string(),
            offset,
            message: "unterminated ${ placeholder".to_string(),
        })?;

        if let [Segment::Expr(source)] = segments.as_slice() {
            return self.evaluate(source, scope);
        }

        let mut out = String::new();
        for segment in &segments {
            match segment {
                Segment::Lit(text) => out.push_str(text),
                Segment::Expr(source) => out.push_str(&display(self.evaluate(source, scope)?.as_ref())),
            }
        }
        Ok(Some(Value::String(out)))
    }

    /// Calls a registered helper directly.
    pub fn call_helper(&self, name: &str, args: &[Option<Value>]) -> EvalResult<Option<Value>> {
        let helper = self.helpers.get(name).ok_or_else(|| EvalError::UnknownHelper {
            expr: name.to_string(),
            name: name.to_string(),
        })?;
        helper(args).map_err(|message| EvalError::Helper {
            expr: name.to_string(),
            name: name.to_string(),
            message,
        })
    }
}

struct Interp<'e, 's> {
    source: &'e str,
    scope: &'e Scope<'s>,
    helpers: &'e HelperRegistry,
    locals: Vec<(String, Option<Value>)>,
    depth: usize,
    max_depth: usize,
}

impl Interp<'_, '_> {
    fn eval(&mut self, expr: &Expr) -> EvalResult<Option<Value>> {
        self.depth += 1;
        if self.depth > self.max_depth {
            self.depth -= 1;
            return Err(EvalError::TooDeep {
                expr: self.source.to_string(),
                limit: self.max_depth,
            });
        }
        let result = self.eval_inner(expr);
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr) -> EvalResult<Option<Value>> {
        match expr {
            Expr::Literal(v) => Ok(Some(v.clone())),
            Expr::Undefined => Ok(None),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?.unwrap_or(Value::Null));
                }
                Ok(Some(Value::Array(out)))
            }
            Expr::Object(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    if let Some(v) = self.eval(value)? {
                        map.insert(key.clone(), v);
                    }
                }
                Ok(Some(Value::Object(map)))
            }
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Lit(s) => out.push_str(s),
                        TemplatePart::Expr(e) => out.push_str(&display(self.eval(e)?.as_ref())),
                    }
                }
                Ok(Some(Value::String(out)))
            }
            Expr::Ident(name) => self.lookup(name),
            Expr::Member {
                object, property, ..
            } => {
                if let Expr::Ident(root) = object.as_ref() {
                    if root == "context" && self.is_context_keyword() {
                        return Ok(self.scope.context().get(property).cloned());
                    }
                }
                let target = self.eval(object)?;
                Ok(self.member(target.as_ref(), property))
            }
            Expr::Index { object, index, .. } => {
                let target = self.eval(object)?;
                let key = self.eval(index)?;
                Ok(self.index(target.as_ref(), key.as_ref()))
            }
            Expr::MethodCall {
                object,
                method,
                args,
                optional,
            } => {
                let target = self.eval(object)?;
                if *optional && matches!(target, None | Some(Value::Null)) {
                    return Ok(None);
                }
                self.call_method(target, method, args)
            }
            Expr::HelperCall { name, args } => {
                let helper = self.helpers.get(name).cloned().ok_or_else(|| {
                    EvalError::UnknownHelper {
                        expr: self.source.to_string(),
                        name: name.clone(),
                    }
                })?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    if matches!(arg, Expr::Arrow { .. }) {
                        return Err(self.mismatch(name, "helpers do not accept functions"));
                    }
                    values.push(self.eval(arg)?);
                }
                helper(&values).map_err(|message| EvalError::Helper {
                    expr: self.source.to_string(),
                    name: name.clone(),
                    message,
                })
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Some(Value::Bool(!truthy(v.as_ref())))),
                    UnaryOp::Neg => match v.as_ref().and_then(Value::as_f64) {
                        Some(n) => Ok(Some(number(-n))),
                        None => Err(self.mismatch(
                            "-",
                            &format!("cannot negate {}", type_name(v.as_ref())),
                        )),
                    },
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.binary(*op, l, r)
            }
            Expr::Logical { op, left, right } => {
                let l = self.eval(left)?;
                let take_left = match op {
                    LogicalOp::And => !truthy(l.as_ref()),
                    LogicalOp::Or => truthy(l.as_ref()),
                    LogicalOp::Nullish => !matches!(l, None | Some(Value::Null)),
                };
                if take_left { Ok(l) } else { self.eval(right) }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let t = self.eval(test)?;
                if truthy(t.as_ref()) {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Arrow { .. } => Err(self.mismatch(
                "=>",
                "arrow functions can only be passed to array methods",
            )),
        }
    }

    // ── Names ────────────────────────────────────────────────────

    fn is_context_keyword(&self) -> bool {
        !self.locals.iter().any(|(n, _)| n == "context") && self.scope.var("context").is_none()
    }

    fn lookup(&self, name: &str) -> EvalResult<Option<Value>> {
        if let Some((_, v)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.scope.var(name) {
            return Ok(v.clone());
        }
        if name == "context" {
            return Ok(Some(Value::Object(self.scope.context().clone())));
        }
        if let Some(v) = self.scope.context().get(name) {
            return Ok(Some(v.clone()));
        }
        Err(EvalError::UnknownIdentifier {
            expr: self.source.to_string(),
            name: name.to_string(),
        })
    }

    // ── Property access ──────────────────────────────────────────

    fn member(&self, target: Option<&Value>, property: &str) -> Option<Value> {
        match (target, property) {
            (Some(Value::Array(items)), "length") => Some(number(items.len() as f64)),
            (Some(Value::String(s)), "length") => Some(number(s.chars().count() as f64)),
            (Some(Value::Object(map)), key) => map.get(key).cloned(),
            _ => None,
        }
    }

    fn index(&self, target: Option<&Value>, key: Option<&Value>) -> Option<Value> {
        match (target, key) {
            (Some(Value::Array(items)), Some(Value::Number(n))) => {
                let i = n.as_f64()?;
                if i < 0.0 || i.fract() != 0.0 {
                    return None;
                }
                items.get(i as usize).cloned()
            }
            (Some(Value::String(s)), Some(Value::Number(n))) => {
                let i = n.as_u64()? as usize;
                s.chars().nth(i).map(|c| Value::String(c.to_string()))
            }
            (Some(t), Some(Value::String(k))) => match (t, k.as_str()) {
                (Value::Array(_) | Value::String(_), "length") => self.member(Some(t), k),
                _ => step(t, k).cloned(),
            },
            _ => None,
        }
    }

    // ── Operators ────────────────────────────────────────────────

    fn binary(&self, op: BinaryOp, l: Option<Value>, r: Option<Value>) -> EvalResult<Option<Value>> {
        let (a, b) = (l.as_ref(), r.as_ref());
        let result = match op {
            BinaryOp::StrictEq => Value::Bool(strict_equals(a, b)),
            BinaryOp::StrictNe => Value::Bool(!strict_equals(a, b)),
            BinaryOp::LooseEq => Value::Bool(loose_equals(a, b)),
            BinaryOp::LooseNe => Value::Bool(!loose_equals(a, b)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                Value::Bool(compare(op, a, b))
            }
            BinaryOp::Add => match (a, b) {
                (Some(Value::Number(x)), Some(Value::Number(y))) => {
                    number(x.as_f64().unwrap_or(f64::NAN) + y.as_f64().unwrap_or(f64::NAN))
                }
                (Some(Value::String(_) | Value::Array(_) | Value::Object(_)), _)
                | (_, Some(Value::String(_) | Value::Array(_) | Value::Object(_))) => {
                    Value::String(format!("{}{}", display(a), display(b)))
                }
                _ => {
                    return Err(self.mismatch(
                        "+",
                        &format!("cannot add {} and {}", type_name(a), type_name(b)),
                    ));
                }
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let (Some(x), Some(y)) = (a.and_then(Value::as_f64), b.and_then(Value::as_f64))
                else {
                    return Err(self.mismatch(
                        op.symbol(),
                        &format!(
                            "arithmetic needs numbers, got {} and {}",
                            type_name(a),
                            type_name(b)
                        ),
                    ));
                };
                match op {
                    BinaryOp::Sub => number(x - y),
                    BinaryOp::Mul => number(x * y),
                    _ if y == 0.0 => {
                        return Err(EvalError::DivisionByZero {
                            expr: self.source.to_string(),
                        });
                    }
                    BinaryOp::Div => number(x / y),
                    _ => number(x % y),
                }
            }
        };
        Ok(Some(result))
    }

    // ── Methods ──────────────────────────────────────────────────

    fn call_method(
        &mut self,
        target: Option<Value>,
        method: &str,
        args: &[Expr],
    ) -> EvalResult<Option<Value>> {
        match target {
            Some(Value::Array(items)) => self.array_method(items, method, args),
            Some(Value::String(s)) => self.string_method(&s, method, args),
            Some(Value::Number(n)) if method == "toFixed" => {
                let digits = self.arg_number(args, 0)?.unwrap_or(0.0).clamp(0.0, 20.0) as usize;
                Ok(Some(Value::String(format!(
                    "{:.*}",
                    digits,
                    n.as_f64().unwrap_or(f64::NAN)
                ))))
            }
            other => Err(EvalError::UnknownMethod {
                expr: self.source.to_string(),
                method: method.to_string(),
                receiver: type_name(other.as_ref()).to_string(),
            }),
        }
    }

    fn array_method(
        &mut self,
        items: Vec<Value>,
        method: &str,
        args: &[Expr],
    ) -> EvalResult<Option<Value>> {
        match method {
            "filter" => {
                let mut out = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    if truthy(self.call_fn(args, 0, &[Some(item.clone()), idx(i)])?.as_ref()) {
                        out.push(item);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            "find" => {
                for (i, item) in items.into_iter().enumerate() {
                    if truthy(self.call_fn(args, 0, &[Some(item.clone()), idx(i)])?.as_ref()) {
                        return Ok(Some(item));
                    }
                }
                Ok(None)
            }
            "findIndex" => {
                for (i, item) in items.into_iter().enumerate() {
                    if truthy(self.call_fn(args, 0, &[Some(item), idx(i)])?.as_ref()) {
                        return Ok(idx(i));
                    }
                }
                Ok(Some(number(-1.0)))
            }
            "map" => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    out.push(self.call_fn(args, 0, &[Some(item), idx(i)])?.unwrap_or(Value::Null));
                }
                Ok(Some(Value::Array(out)))
            }
            "some" | "every" => {
                let want = method == "some";
                for (i, item) in items.into_iter().enumerate() {
                    if truthy(self.call_fn(args, 0, &[Some(item), idx(i)])?.as_ref()) == want {
                        return Ok(Some(Value::Bool(want)));
                    }
                }
                Ok(Some(Value::Bool(!want)))
            }
            "includes" => {
                let needle = self.arg(args, 0)?;
                Ok(Some(Value::Bool(
                    items.iter().any(|v| strict_equals(Some(v), needle.as_ref())),
                )))
            }
            "indexOf" => {
                let needle = self.arg(args, 0)?;
                let pos = items
                    .iter()
                    .position(|v| strict_equals(Some(v), needle.as_ref()))
                    .map(|p| p as f64)
                    .unwrap_or(-1.0);
                Ok(Some(number(pos)))
            }
            "join" => {
                let sep = match self.arg(args, 0)? {
                    None => ",".to_string(),
                    Some(v) => display(Some(&v)),
                };
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        Value::Null => String::new(),
                        other => display(Some(other)),
                    })
                    .collect();
                Ok(Some(Value::String(parts.join(&sep))))
            }
            "slice" => {
                let (start, end) = self.slice_bounds(args, items.len())?;
                Ok(Some(Value::Array(items[start..end].to_vec())))
            }
            "concat" => {
                let mut out = items;
                for i in 0..args.len() {
                    match self.arg(args, i)? {
                        Some(Value::Array(more)) => out.extend(more),
                        Some(v) => out.push(v),
                        None => out.push(Value::Null),
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            "reduce" => {
                let mut iter = items.into_iter().enumerate();
                let mut acc = if args.len() > 1 {
                    self.arg(args, 1)?
                } else {
                    match iter.next() {
                        Some((_, first)) => Some(first),
                        None => {
                            return Err(self.mismatch(
                                "reduce",
                                "reduce of empty array with no initial value",
                            ));
                        }
                    }
                };
                for (i, item) in iter {
                    acc = self.call_fn(args, 0, &[acc, Some(item), idx(i)])?;
                }
                Ok(acc)
            }
            _ => Err(EvalError::UnknownMethod {
                expr: self.source.to_string(),
                method: method.to_string(),
                receiver: "array".to_string(),
            }),
        }
    }

    fn string_method(&mut self, s: &str, method: &str, args: &[Expr]) -> EvalResult<Option<Value>> {
        let text = |v: String| Ok(Some(Value::String(v)));
        match method {
            "toUpperCase" => text(s.to_uppercase()),
            "toLowerCase" => text(s.to_lowercase()),
            "trim" => text(s.trim().to_string()),
            "startsWith" | "endsWith" | "includes" => {
                let needle = display(self.arg(args, 0)?.as_ref());
                let hit = match method {
                    "startsWith" => s.starts_with(&needle),
                    "endsWith" => s.ends_with(&needle),
                    _ => s.contains(&needle),
                };
                Ok(Some(Value::Bool(hit)))
            }
            "indexOf" => {
                let needle = display(self.arg(args, 0)?.as_ref());
                let pos = s
                    .find(&needle)
                    .map(|byte| s[..byte].chars().count() as f64)
                    .unwrap_or(-1.0);
                Ok(Some(number(pos)))
            }
            "split" => {
                let parts: Vec<Value> = match self.arg(args, 0)? {
                    None => vec![Value::String(s.to_string())],
                    Some(sep) => {
                        let sep = display(Some(&sep));
                        if sep.is_empty() {
                            s.chars().map(|c| Value::String(c.to_string())).collect()
                        } else {
                            s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect()
                        }
                    }
                };
                Ok(Some(Value::Array(parts)))
            }
            "slice" => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = self.slice_bounds(args, chars.len())?;
                text(chars[start..end].iter().collect())
            }
            _ => Err(EvalError::UnknownMethod {
                expr: self.source.to_string(),
                method: method.to_string(),
                receiver: "string".to_string(),
            }),
        }
    }

    // ── Arguments ────────────────────────────────────────────────

    fn arg(&mut self, args: &[Expr], i: usize) -> EvalResult<Option<Value>> {
        match args.get(i) {
            None => Ok(None),
            Some(Expr::Arrow { .. }) => Err(self.mismatch("argument", "unexpected function argument")),
            Some(e) => self.eval(e),
        }
    }

    fn arg_number(&mut self, args: &[Expr], i: usize) -> EvalResult<Option<f64>> {
        Ok(self.arg(args, i)?.as_ref().and_then(|v| to_number(Some(v))))
    }

    /// Resolves JavaScript `slice(start, end)` bounds, including negatives.
    fn slice_bounds(&mut self, args: &[Expr], len: usize) -> EvalResult<(usize, usize)> {
        let resolve = |n: Option<f64>, default: usize| -> usize {
            match n {
                None => default,
                Some(n) if n < 0.0 => len.saturating_sub((-n) as usize),
                Some(n) => (n as usize).min(len),
            }
        };
        let start = resolve(self.arg_number(args, 0)?, 0);
        let end = resolve(self.arg_number(args, 1)?, len);
        Ok((start, end.max(start)))
    }

    /// Invokes the arrow function passed as argument `i` with `params`.
    fn call_fn(
        &mut self,
        args: &[Expr],
        i: usize,
        params: &[Option<Value>],
    ) -> EvalResult<Option<Value>> {
        let Some(Expr::Arrow { params: names, body }) = args.get(i) else {
            return Err(self.mismatch("argument", "expected an arrow function"));
        };
        let mark = self.locals.len();
        for (pos, name) in names.iter().enumerate() {
            let value = params.get(pos).cloned().flatten();
            self.locals.push((name.clone(), value));
        }
        let result = self.eval(body);
        self.locals.truncate(mark);
        result
    }

    fn mismatch(&self, path: &str, message: &str) -> EvalError {
        EvalError::TypeMismatch {
            expr: self.source.to_string(),
            path: path.to_string(),
            message: message.to_string(),
        }
    }
}

fn idx(i: usize) -> Option<Value> {
    Some(number(i as f64))
}

fn compare(op: BinaryOp, a: Option<&Value>, b: Option<&Value>) -> bool {
    if let (Some(Value::String(x)), Some(Value::String(y))) = (a, b) {
        return match op {
            BinaryOp::Lt => x < y,
            BinaryOp::Le => x <= y,
            BinaryOp::Gt => x > y,
            _ => x >= y,
        };
    }
    let (Some(x), Some(y)) = (to_number(a), to_number(b)) else {
        return false;
    };
    match op {
        BinaryOp::Lt => x < y,
        BinaryOp::Le => x <= y,
        BinaryOp::Gt => x > y,
        _ => x >= y,
    }
}

use serde_json::Value;
use std::collections::BTreeSet;

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Undefined,
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Template(Vec<TemplatePart>),
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        optional: bool,
    },
    HelperCall {
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    /// Only valid as a method argument.
    Arrow {
        params: Vec<String>,
        body: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Lit(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNe => "!==",
            BinaryOp::LooseEq => "==",
            BinaryOp::LooseNe => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

impl Expr {
    /// Names of the free identifiers this expression reads from its scope.
    ///
    /// `context.x` contributes `x`; a bare `context` contributes `context`.
    /// Arrow parameters are bound and never reported.
    pub fn free_identifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut bound = Vec::new();
        collect_free(self, &mut bound, &mut out);
        out
    }
}

fn collect_free(expr: &Expr, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) | Expr::Undefined => {}
        Expr::Ident(name) => {
            if !bound.iter().any(|b| b == name) {
                out.insert(name.clone());
            }
        }
        Expr::Member { object, property, .. } => match object.as_ref() {
            Expr::Ident(name) if name == "context" && !bound.iter().any(|b| b == name) => {
                out.insert(property.clone());
            }
            other => collect_free(other, bound, out),
        },
        Expr::Index { object, index, .. } => {
            collect_free(object, bound, out);
            collect_free(index, bound, out);
        }
        Expr::MethodCall { object, args, .. } => {
            collect_free(object, bound, out);
            for arg in args {
                collect_free(arg, bound, out);
            }
        }
        Expr::HelperCall { args, .. } | Expr::Array(args) => {
            for arg in args {
                collect_free(arg, bound, out);
            }
        }
        Expr::Object(entries) => {
            for (_, value) in entries {
                collect_free(value, bound, out);
            }
        }
        Expr::Template(parts) => {
            for part in parts {
                if let TemplatePart::Expr(e) = part {
                    collect_free(e, bound, out);
                }
            }
        }
        Expr::Unary { operand, .. } => collect_free(operand, bound, out),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            collect_free(left, bound, out);
            collect_free(right, bound, out);
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            collect_free(test, bound, out);
            collect_free(consequent, bound, out);
            collect_free(alternate, bound, out);
        }
        Expr::Arrow { params, body } => {
            let mark = bound.len();
            bound.extend(params.iter().cloned());
            collect_free(body, bound, out);
            bound.truncate(mark);
        }
    }
}

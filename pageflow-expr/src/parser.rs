//! Recursive-descent parser producing [`Expr`] trees.
//!
//! Precedence, lowest first: arrow, conditional, `|| ??`, `&&`, equality,
//! relational, additive, multiplicative, unary, postfix.

use crate::ast::{BinaryOp, Expr, LogicalOp, TemplatePart, UnaryOp};
use crate::error::{EvalError, EvalResult};
use crate::lexer::{RawPart, Spanned, Token, tokenize};
use serde_json::Value;

pub(crate) fn parse(source: &str, max_depth: usize) -> EvalResult<Expr> {
    parse_nested(source, source, 0, 0, max_depth)
}

fn parse_nested(
    root: &str,
    source: &str,
    base_offset: usize,
    depth: usize,
    max_depth: usize,
) -> EvalResult<Expr> {
    let tokens = tokenize(source).map_err(|e| EvalError::Parse {
        expr: root.to_string(),
        offset: base_offset + e.offset,
        message: e.message,
    })?;
    let mut parser = Parser {
        root,
        tokens,
        pos: 0,
        depth,
        max_depth,
        base_offset,
    };
    let expr = parser.parse_expression()?;
    if !matches!(parser.peek(), Token::Eof) {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'a> {
    root: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    base_offset: usize,
}

impl Parser<'_> {
    // ── Token helpers ────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> EvalResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn error(&self, message: &str) -> EvalError {
        let offset = self.tokens[self.pos.min(self.tokens.len() - 1)].offset;
        EvalError::Parse {
            expr: self.root.to_string(),
            offset: self.base_offset + offset,
            message: message.to_string(),
        }
    }

    fn enter(&mut self) -> EvalResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(EvalError::TooDeep {
                expr: self.root.to_string(),
                limit: self.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ── Grammar ──────────────────────────────────────────────────

    fn parse_expression(&mut self) -> EvalResult<Expr> {
        self.enter()?;
        let expr = if self.at_arrow() {
            self.parse_arrow()
        } else {
            self.parse_conditional()
        };
        self.leave();
        expr
    }

    fn at_arrow(&self) -> bool {
        match self.peek() {
            Token::Ident(_) => matches!(self.peek_at(1), Token::Arrow),
            Token::LParen => {
                let mut ahead = 1;
                if matches!(self.peek_at(ahead), Token::RParen) {
                    return matches!(self.peek_at(ahead + 1), Token::Arrow);
                }
                loop {
                    if !matches!(self.peek_at(ahead), Token::Ident(_)) {
                        return false;
                    }
                    ahead += 1;
                    match self.peek_at(ahead) {
                        Token::Comma => ahead += 1,
                        Token::RParen => return matches!(self.peek_at(ahead + 1), Token::Arrow),
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> EvalResult<Expr> {
        let mut params = Vec::new();
        if self.eat(&Token::LParen) {
            while let Token::Ident(name) = self.peek().clone() {
                self.advance();
                params.push(name);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen, "')' after arrow parameters")?;
        } else if let Token::Ident(name) = self.advance() {
            params.push(name);
        }
        self.expect(&Token::Arrow, "'=>'")?;
        let body = self.parse_expression()?;
        Ok(Expr::Arrow {
            params,
            body: Box::new(body),
        })
    }

    fn parse_conditional(&mut self) -> EvalResult<Expr> {
        let test = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.parse_expression()?;
        self.expect(&Token::Colon, "':' in conditional")?;
        let alternate = self.parse_expression()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_or(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_and()?;
        loop {
            let op = match self.peek() {
                Token::OrOr => LogicalOp::Or,
                Token::Nullish => LogicalOp::Nullish,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_and(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::EqEqEq => BinaryOp::StrictEq,
                Token::NotEqEq => BinaryOp::StrictNe,
                Token::EqEq => BinaryOp::LooseEq,
                Token::NotEq => BinaryOp::LooseNe,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
    }

    fn parse_relational(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> EvalResult<Expr> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn parse_postfix(&mut self) -> EvalResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    expr = self.parse_property(expr, false)?;
                }
                Token::QuestionDot => {
                    self.advance();
                    if self.eat(&Token::LBracket) {
                        let index = self.parse_expression()?;
                        self.expect(&Token::RBracket, "']'")?;
                        expr = Expr::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                            optional: true,
                        };
                    } else {
                        expr = self.parse_property(expr, true)?;
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: false,
                    };
                }
                Token::LParen => {
                    let Expr::Ident(name) = expr else {
                        return Err(self.error("only helpers and methods can be called"));
                    };
                    self.advance();
                    let args = self.parse_args()?;
                    expr = Expr::HelperCall { name, args };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_property(&mut self, object: Expr, optional: bool) -> EvalResult<Expr> {
        let Token::Ident(property) = self.advance() else {
            return Err(self.error("expected property name"));
        };
        if self.eat(&Token::LParen) {
            let args = self.parse_args()?;
            return Ok(Expr::MethodCall {
                object: Box::new(object),
                method: property,
                args,
                optional,
            });
        }
        Ok(Expr::Member {
            object: Box::new(object),
            property,
            optional,
        })
    }

    /// Parses call arguments after the opening parenthesis.
    fn parse_args(&mut self) -> EvalResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "')' after arguments")?;
            return Ok(args);
        }
    }

    fn parse_primary(&mut self) -> EvalResult<Expr> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(crate::value::number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Template(parts) => self.parse_template(parts),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                "undefined" => Expr::Undefined,
                _ => Expr::Ident(name),
            }),
            Token::LParen => {
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expression()?);
                        if self.eat(&Token::Comma) {
                            if self.eat(&Token::RBracket) {
                                break;
                            }
                            continue;
                        }
                        self.expect(&Token::RBracket, "']' after array items")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            Token::LBrace => self.parse_object(),
            Token::Eof => Err(self.error("unexpected end of expression")),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("unexpected token"))
            }
        }
    }

    fn parse_object(&mut self) -> EvalResult<Expr> {
        let mut entries = Vec::new();
        while !self.eat(&Token::RBrace) {
            let key = match self.advance() {
                Token::Ident(k) | Token::Str(k) => k,
                _ => return Err(self.error("expected object key")),
            };
            let value = if self.eat(&Token::Colon) {
                self.parse_expression()?
            } else {
                Expr::Ident(key.clone())
            };
            entries.push((key, value));
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace, "'}' after object entries")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }

    fn parse_template(&mut self, parts: Vec<RawPart>) -> EvalResult<Expr> {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                RawPart::Lit(s) => out.push(TemplatePart::Lit(s)),
                RawPart::Expr { source, offset } => {
                    let expr = parse_nested(
                        self.root,
                        &source,
                        self.base_offset + offset,
                        self.depth + 1,
                        self.max_depth,
                    )?;
                    out.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(out))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

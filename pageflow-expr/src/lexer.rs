//! Tokenizer for the expression language.

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Template(Vec<RawPart>),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    QuestionDot,
    Question,
    Colon,
    Arrow,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Nullish,
    Eof,
}

/// Piece of a backtick template before its placeholders are parsed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawPart {
    Lit(String),
    Expr { source: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LexError {
    pub offset: usize,
    pub message: String,
}

impl LexError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, LexError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;

        if c.is_ascii_digit() {
            let mut seen_dot = false;
            while i < bytes.len() {
                let b = bytes[i];
                if b.is_ascii_digit() {
                    i += 1;
                } else if b == b'.'
                    && !seen_dot
                    && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)
                {
                    seen_dot = true;
                    i += 1;
                } else {
                    break;
                }
            }
            let text = &src[start..i];
            let n: f64 = text
                .parse()
                .map_err(|_| LexError::new(start, format!("invalid number '{text}'")))?;
            tokens.push(Spanned { token: Token::Number(n), offset: start });
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            tokens.push(Spanned {
                token: Token::Ident(src[start..i].to_string()),
                offset: start,
            });
            continue;
        }

        if c == b'\'' || c == b'"' {
            let (s, next) = read_quoted(src, i)?;
            tokens.push(Spanned { token: Token::Str(s), offset: start });
            i = next;
            continue;
        }

        if c == b'`' {
            let (parts, next) = read_template(src, i)?;
            tokens.push(Spanned { token: Token::Template(parts), offset: start });
            i = next;
            continue;
        }

        let rest = &src[i..];
        let (token, len) = if rest.starts_with("===") {
            (Token::EqEqEq, 3)
        } else if rest.starts_with("!==") {
            (Token::NotEqEq, 3)
        } else if rest.starts_with("==") {
            (Token::EqEq, 2)
        } else if rest.starts_with("!=") {
            (Token::NotEq, 2)
        } else if rest.starts_with("=>") {
            (Token::Arrow, 2)
        } else if rest.starts_with("<=") {
            (Token::Le, 2)
        } else if rest.starts_with(">=") {
            (Token::Ge, 2)
        } else if rest.starts_with("&&") {
            (Token::AndAnd, 2)
        } else if rest.starts_with("||") {
            (Token::OrOr, 2)
        } else if rest.starts_with("??") {
            (Token::Nullish, 2)
        } else if rest.starts_with("?.") && !rest[2..].starts_with(|ch: char| ch.is_ascii_digit()) {
            (Token::QuestionDot, 2)
        } else {
            let single = match c {
                b'(' => Token::LParen,
                b')' => Token::RParen,
                b'[' => Token::LBracket,
                b']' => Token::RBracket,
                b'{' => Token::LBrace,
                b'}' => Token::RBrace,
                b',' => Token::Comma,
                b'.' => Token::Dot,
                b'?' => Token::Question,
                b':' => Token::Colon,
                b'+' => Token::Plus,
                b'-' => Token::Minus,
                b'*' => Token::Star,
                b'/' => Token::Slash,
                b'%' => Token::Percent,
                b'!' => Token::Bang,
                b'<' => Token::Lt,
                b'>' => Token::Gt,
                b'=' => return Err(LexError::new(i, "assignment is not supported")),
                b';' => return Err(LexError::new(i, "statements are not supported")),
                _ => {
                    let ch = rest.chars().next().unwrap_or('?');
                    return Err(LexError::new(i, format!("unexpected character '{ch}'")));
                }
            };
            (single, 1)
        };
        tokens.push(Spanned { token, offset: start });
        i += len;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: src.len(),
    });
    Ok(tokens)
}

/// Reads a single- or double-quoted string starting at `start` (the quote).
/// Returns the unescaped contents and the index just past the closing quote.
fn read_quoted(src: &str, start: usize) -> Result<(String, usize), LexError> {
    let quote = src.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, esc)) => out.push(unescape(esc)),
                None => break,
            },
            c if c == quote => return Ok((out, start + 1 + idx + 1)),
            c => out.push(c),
        }
    }
    Err(LexError::new(start, "unterminated string literal"))
}

fn read_template(src: &str, start: usize) -> Result<(Vec<RawPart>, usize), LexError> {
    let mut parts = Vec::new();
    let mut lit = String::new();
    let body_start = start + 1;
    let mut i = body_start;

    while i < src.len() {
        let rest = &src[i..];
        if rest.starts_with('`') {
            if !lit.is_empty() {
                parts.push(RawPart::Lit(lit));
            }
            return Ok((parts, i + 1));
        }
        if rest.starts_with("${") {
            let open = i + 2;
            let close = find_placeholder_end(src, open)
                .ok_or_else(|| LexError::new(i, "unterminated ${ in template"))?;
            if !lit.is_empty() {
                parts.push(RawPart::Lit(std::mem::take(&mut lit)));
            }
            parts.push(RawPart::Expr {
                source: src[open..close].to_string(),
                offset: open,
            });
            i = close + 1;
            continue;
        }
        let mut it = rest.chars();
        let ch = it.next().unwrap_or_default();
        if ch == '\\' {
            if let Some(esc) = it.next() {
                lit.push(unescape(esc));
                i += 1 + esc.len_utf8();
                continue;
            }
        }
        lit.push(ch);
        i += ch.len_utf8();
    }
    Err(LexError::new(start, "unterminated template literal"))
}

fn unescape(esc: char) -> char {
    match esc {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}

/// Given the index just after a `${`, returns the index of the matching `}`.
///
/// Nested braces and quoted strings inside the placeholder are skipped.
pub(crate) fn find_placeholder_end(src: &str, from: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 0usize;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' if depth == 0 => return Some(i),
            b'}' => depth -= 1,
            q @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != q {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

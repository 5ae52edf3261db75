//! `${expr}` placeholder scanning for prop strings and payload templates.

use crate::lexer::find_placeholder_end;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment<'a> {
    Lit(&'a str),
    Expr(&'a str),
}

/// True when `text` contains at least one `${` opener.
pub fn has_placeholders(text: &str) -> bool {
    text.contains("${")
}

/// Splits `text` into literal runs and placeholder bodies.
///
/// Returns the byte offset of the opener when a placeholder is never closed.
pub(crate) fn split_template(text: &str) -> Result<Vec<Segment<'_>>, usize> {
    let mut segments = Vec::new();
    let mut rest = 0;
    while let Some(rel) = text[rest..].find("${") {
        let open = rest + rel;
        if open > rest {
            segments.push(Segment::Lit(&text[rest..open]));
        }
        let body = open + 2;
        let close = find_placeholder_end(text, body).ok_or(open)?;
        segments.push(Segment::Expr(text[body..close].trim()));
        rest = close + 1;
    }
    if rest < text.len() || segments.is_empty() {
        segments.push(Segment::Lit(&text[rest..]));
    }
    Ok(segments)
}

/// The source text of every `${...}` placeholder in `text`.
///
/// An unterminated placeholder ends the scan.
pub fn placeholders(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = 0;
    while let Some(rel) = text[rest..].find("${") {
        let body = rest + rel + 2;
        let Some(close) = find_placeholder_end(text, body) else {
            break;
        };
        out.push(text[body..close].trim());
        rest = close + 1;
    }
    out
}

//! Predicate template rendering.
//!
//! Templates use two tokens:
//!
//! | Token | Replaced with |
//! |-------|---------------|
//! | `{{alias}}` | the table's alias, or its reference as written |
//! | `{{param}}` | a bound argument, rendered later as a dialect placeholder |
//!
//! Whitespace inside the braces is ignored. Any other `{{...}}` is left in
//! the SQL verbatim and reported as a warning.

use serde_json::Value;
use thiserror::Error;

/// A piece of a rendered predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Sql(String),
    /// One argument; its placeholder is assigned when the statement is assembled.
    Param(Value),
}

/// A template with its tokens substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPredicate {
    pub fragments: Vec<Fragment>,
    /// Unrecognized `{{...}}` tokens, as written.
    pub unknown_tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("predicate has {expected} parameter slot(s) but the resolver returned {got} value(s)")]
pub struct ParamMismatch {
    pub expected: usize,
    pub got: usize,
}

enum Piece<'t> {
    Text(&'t str),
    Alias,
    Param,
    Unknown(&'t str),
}

fn pieces(template: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}").map(|c| open + 2 + c) else {
            break;
        };
        if open > 0 {
            out.push(Piece::Text(&rest[..open]));
        }
        let raw = &rest[open..close + 2];
        out.push(match rest[open + 2..close].trim() {
            "alias" => Piece::Alias,
            "param" => Piece::Param,
            _ => Piece::Unknown(raw),
        });
        rest = &rest[close + 2..];
    }
    if !rest.is_empty() {
        out.push(Piece::Text(rest));
    }
    out
}

/// Number of `{{param}}` slots in `template`.
pub fn param_slots(template: &str) -> usize {
    pieces(template)
        .iter()
        .filter(|p| matches!(p, Piece::Param))
        .count()
}

/// Fit resolved values to `slots` parameter slots.
///
/// Values map to slots in order. A single value fills every slot.
pub fn bind_values(slots: usize, values: Vec<Value>) -> Result<Vec<Value>, ParamMismatch> {
    match (slots, values.len()) {
        (0, _) => Ok(Vec::new()),
        (s, n) if s == n => Ok(values),
        (s, 1) => Ok(vec![values[0].clone(); s]),
        (expected, got) => Err(ParamMismatch { expected, got }),
    }
}

/// Substitute `qualifier` and the bound values into `template`.
///
/// `values` must already be bound with [`bind_values`].
pub fn render(template: &str, qualifier: &str, values: &[Value]) -> RenderedPredicate {
    let mut fragments: Vec<Fragment> = Vec::new();
    let mut unknown_tokens = Vec::new();
    let mut values = values.iter();

    for piece in pieces(template) {
        match piece {
            Piece::Text(text) => push_sql(&mut fragments, text),
            Piece::Alias => push_sql(&mut fragments, qualifier),
            Piece::Param => match values.next() {
                Some(v) => fragments.push(Fragment::Param(v.clone())),
                None => fragments.push(Fragment::Param(Value::Null)),
            },
            Piece::Unknown(raw) => {
                push_sql(&mut fragments, raw);
                unknown_tokens.push(raw.to_string());
            }
        }
    }

    RenderedPredicate {
        fragments,
        unknown_tokens,
    }
}

fn push_sql(fragments: &mut Vec<Fragment>, text: &str) {
    match fragments.last_mut() {
        Some(Fragment::Sql(last)) => last.push_str(text),
        _ => fragments.push(Fragment::Sql(text.to_string())),
    }
}

/// The template synthesized for a column-mode rule.
pub fn column_template(column: &str) -> String {
    format!("{{{{alias}}}}.{} = {{{{param}}}}", column)
}

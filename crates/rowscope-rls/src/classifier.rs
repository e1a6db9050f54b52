//! Statement classification.
//!
//! Classification looks at leading keywords only. `WITH` is scanned past
//! its balanced CTE bodies to find the terminal statement; `UPDATE` and
//! `DELETE` must have a single recognizable target. Anything else is
//! [`StatementKind::Unknown`].

use std::ops::Range;

use rowscope_core::StatementKind;

use crate::lexer::{TokenKind, Tokens};
use crate::tables::{read_alias, read_name};

/// Classifier output: the statement kind plus the structure later stages need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: StatementKind,
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// A query expression (possibly with set operators) spanning the statement.
    Select,
    Cte(CteHeader),
    Update(Target),
    Delete(Target),
    /// Why the statement could not be classified.
    Unknown(&'static str),
}

/// The `WITH` prologue of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteHeader {
    /// Whether the block is `WITH RECURSIVE`.
    pub recursive: bool,
    /// CTE names in declaration order.
    pub names: Vec<String>,
    /// Token ranges of the CTE bodies, without their parens.
    pub bodies: Vec<Range<usize>>,
    /// Token range of the terminal statement.
    pub main: Range<usize>,
}

/// Target table of an `UPDATE` or `DELETE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Tokens of the (possibly qualified) table name.
    pub name: Range<usize>,
    pub alias: Option<usize>,
    /// First token after the target and its alias.
    pub rest: usize,
}

const DELETE_FOLLOWERS: &[&str] = &[
    "WHERE", "USING", "RETURNING", "ORDER", "LIMIT", "OPTION", "OUTPUT",
];

/// Classify the statement occupying `range`.
pub fn classify(toks: &Tokens<'_>, range: Range<usize>) -> Classification {
    if range.is_empty() {
        return unknown("empty statement");
    }
    if toks.is_malformed(range.clone()) {
        return unknown("unbalanced parentheses or unterminated literal");
    }

    let lo = range.start;
    if toks.is_kw(lo, "SELECT") {
        return Classification {
            kind: StatementKind::Select,
            shape: Shape::Select,
        };
    }
    if toks.is_kw(lo, "WITH") {
        return match parse_cte_header(toks, range) {
            Some(header) if toks.is_kw(header.main.start, "SELECT") => Classification {
                kind: StatementKind::Cte,
                shape: Shape::Cte(header),
            },
            Some(_) => unknown("WITH block does not end in SELECT"),
            None => unknown("malformed WITH block"),
        };
    }
    if toks.is_kw(lo, "UPDATE") {
        return classify_update(toks, range);
    }
    if toks.is_kw(lo, "DELETE") {
        return classify_delete(toks, range);
    }
    unknown("unsupported statement type")
}

fn unknown(reason: &'static str) -> Classification {
    Classification {
        kind: StatementKind::Unknown,
        shape: Shape::Unknown(reason),
    }
}

fn classify_update(toks: &Tokens<'_>, range: Range<usize>) -> Classification {
    let mut i = range.start + 1;
    while i < range.end && toks.is_any_kw(i, &["ONLY", "LOW_PRIORITY", "IGNORE"]) {
        i += 1;
    }
    let Some(name_end) = read_name(toks, i, range.end) else {
        return unknown("UPDATE without a target table");
    };
    let mut next = name_end;
    // Postgres `UPDATE ONLY t *`
    if next < range.end && toks.kind(next) == Some(TokenKind::Operator) && toks.text(next) == "*" {
        next += 1;
    }
    let (alias, rest) = read_alias(toks, next, range.end);
    if !toks.is_kw(rest, "SET") || rest >= range.end {
        return unknown("UPDATE with more than one target table");
    }
    Classification {
        kind: StatementKind::Update,
        shape: Shape::Update(Target {
            name: i..name_end,
            alias,
            rest,
        }),
    }
}

fn classify_delete(toks: &Tokens<'_>, range: Range<usize>) -> Classification {
    let mut i = range.start + 1;
    while i < range.end && toks.is_any_kw(i, &["LOW_PRIORITY", "QUICK", "IGNORE"]) {
        i += 1;
    }
    if !toks.is_kw(i, "FROM") {
        return unknown("DELETE without FROM");
    }
    i += 1;
    if toks.is_kw(i, "ONLY") {
        i += 1;
    }
    let Some(name_end) = read_name(toks, i, range.end) else {
        return unknown("DELETE without a target table");
    };
    let (alias, rest) = read_alias(toks, name_end, range.end);
    if rest < range.end && !toks.is_any_kw(rest, DELETE_FOLLOWERS) {
        return unknown("DELETE with more than one target table");
    }
    Classification {
        kind: StatementKind::Delete,
        shape: Shape::Delete(Target {
            name: i..name_end,
            alias,
            rest,
        }),
    }
}

/// Parse `WITH [RECURSIVE] name [(cols)] AS [[NOT] MATERIALIZED] (body), ...`.
///
/// Returns `None` if the prologue does not have that shape or nothing
/// follows it.
pub fn parse_cte_header(toks: &Tokens<'_>, range: Range<usize>) -> Option<CteHeader> {
    let mut i = range.start;
    if !toks.is_kw(i, "WITH") {
        return None;
    }
    i += 1;
    let recursive = toks.is_kw(i, "RECURSIVE");
    if recursive {
        i += 1;
    }

    let mut names = Vec::new();
    let mut bodies = Vec::new();
    loop {
        match toks.kind(i) {
            Some(TokenKind::Word) | Some(TokenKind::QuotedIdent) if i < range.end => {
                names.push(crate::tables::unquote(toks.text(i)).to_ascii_lowercase());
                i += 1;
            }
            _ => return None,
        }
        if toks.kind(i) == Some(TokenKind::LParen) {
            i = toks.skip(i);
        }
        if !toks.is_kw(i, "AS") {
            return None;
        }
        i += 1;
        if toks.is_kw(i, "NOT") {
            i += 1;
        }
        if toks.is_kw(i, "MATERIALIZED") {
            i += 1;
        }
        if toks.kind(i) != Some(TokenKind::LParen) {
            return None;
        }
        let close = toks.matching(i).filter(|&m| m < range.end)?;
        bodies.push(i + 1..close);
        i = close + 1;
        if toks.kind(i) == Some(TokenKind::Comma) && i < range.end {
            i += 1;
            continue;
        }
        break;
    }

    if i >= range.end {
        return None;
    }
    Some(CteHeader {
        recursive,
        names,
        bodies,
        main: i..range.end,
    })
}

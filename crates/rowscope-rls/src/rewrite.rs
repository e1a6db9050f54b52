//! Predicate insertion and statement assembly.
//!
//! Predicates are spliced into the original text at byte offsets, so
//! everything the engine does not touch (comments, casing, whitespace,
//! literals) survives verbatim. Placeholders for injected arguments are
//! assigned in final text order once all insertions are known.

use rowscope_core::Dialect;
use serde_json::Value;

use crate::lexer::{TokenKind, Tokens};
use crate::render::Fragment;
use crate::tables::{FilterScope, ScopeKind};

/// Keywords that end a `SELECT`'s `WHERE` clause.
const SELECT_TAIL: &[&str] = &[
    "GROUP", "HAVING", "WINDOW", "QUALIFY", "ORDER", "LIMIT", "OFFSET", "FETCH", "FOR", "OPTION",
    "RETURNING", "UNION", "INTERSECT", "EXCEPT", "MINUS",
];

/// Keywords that end an `UPDATE`/`DELETE`'s `WHERE` clause.
const DML_TAIL: &[&str] = &["RETURNING", "ORDER", "LIMIT", "OPTION"];

/// Fragments to splice in at a byte offset of the original SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct Insertion {
    pub offset: usize,
    pub fragments: Vec<Fragment>,
}

/// Where a scope's filter goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSite {
    /// Token index of the scope's `WHERE`.
    pub where_at: Option<usize>,
    /// Token index that ends the filter region (a tail keyword or the scope end).
    pub tail: usize,
    /// Byte offset where new conjuncts are appended.
    pub offset: usize,
}

/// Locate the `WHERE` clause of `scope` and the point new conjuncts go.
pub fn filter_site(toks: &Tokens<'_>, scope: &FilterScope) -> FilterSite {
    let tail_keywords = match scope.kind {
        ScopeKind::Select => SELECT_TAIL,
        ScopeKind::Update | ScopeKind::Delete => DML_TAIL,
    };
    let mut where_at = None;
    let mut tail = scope.end;
    let mut i = scope.start;
    while i < scope.end {
        if where_at.is_none() && toks.is_kw(i, "WHERE") {
            where_at = Some(i);
        } else if toks.is_any_kw(i, tail_keywords) {
            tail = i;
            break;
        }
        i = toks.skip(i);
    }
    let last = tail.saturating_sub(1).max(scope.start.saturating_sub(1));
    let offset = toks.get(last).map(|t| t.end).unwrap_or(toks.sql().len());
    FilterSite {
        where_at,
        tail,
        offset,
    }
}

/// Whether a condition must be parenthesized before `AND` is appended.
fn needs_wrap(toks: &Tokens<'_>, lo: usize, hi: usize) -> bool {
    let mut i = lo;
    while i < hi {
        if toks.is_any_kw(i, &["OR", "XOR"])
            || (toks.kind(i) == Some(TokenKind::Operator) && toks.text(i) == "||")
        {
            return true;
        }
        i = toks.skip(i);
    }
    false
}

/// Build the insertions that conjoin `predicates` onto `scope`'s filter.
///
/// With an existing `WHERE`, each predicate is appended as `AND (p)`; the
/// original condition is parenthesized first if it contains a top-level
/// `OR`. Without one, `WHERE (p1) AND (p2) ...` is inserted before the
/// first clause that follows the `FROM` list.
pub fn filter_insertions(toks: &Tokens<'_>, scope: &FilterScope, predicates: Vec<Vec<Fragment>>) -> Vec<Insertion> {
    if predicates.is_empty() {
        return Vec::new();
    }
    let site = filter_site(toks, scope);
    let mut insertions = Vec::new();
    let mut fragments = Vec::new();

    let mut connector = " WHERE (";
    if let Some(w) = site.where_at {
        connector = " AND (";
        if needs_wrap(toks, w + 1, site.tail) {
            if let Some(first) = toks.get(w + 1) {
                insertions.push(Insertion {
                    offset: first.start,
                    fragments: vec![Fragment::Sql("(".to_string())],
                });
                fragments.push(Fragment::Sql(")".to_string()));
            }
        }
    }
    for predicate in predicates {
        fragments.push(Fragment::Sql(connector.to_string()));
        fragments.extend(predicate);
        fragments.push(Fragment::Sql(")".to_string()));
        connector = " AND (";
    }
    insertions.push(Insertion {
        offset: site.offset,
        fragments,
    });
    insertions
}

/// The rewritten call.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub sql: String,
    pub args: Vec<Value>,
    pub warnings: Vec<String>,
}

/// Apply `insertions` to the SQL and merge the injected arguments with the
/// caller's.
///
/// With `?` placeholders, injected values are interleaved with the caller's
/// by position; when the caller's argument count does not equal the number
/// of `?` in the text, positions cannot be trusted, so injected values are
/// appended and a warning is recorded. With numbered placeholders, new
/// numbers continue after the highest one in use and values are appended.
pub fn assemble(toks: &Tokens<'_>, mut insertions: Vec<Insertion>, dialect: Dialect, args: Vec<Value>) -> Assembled {
    insertions.sort_by_key(|ins| ins.offset);
    match dialect {
        Dialect::QuestionMark => assemble_positional(toks, insertions, args),
        Dialect::Dollar | Dialect::AtP => assemble_numbered(toks, insertions, dialect, args),
    }
}

fn assemble_positional(toks: &Tokens<'_>, insertions: Vec<Insertion>, args: Vec<Value>) -> Assembled {
    let sql = toks.sql();
    let marks: Vec<usize> = toks
        .placeholders(0..toks.len())
        .filter(|(_, text)| *text == "?")
        .filter_map(|(i, _)| toks.get(i).map(|t| t.start))
        .collect();
    let interleave = marks.len() == args.len();

    let mut warnings = Vec::new();
    let mut out = String::with_capacity(sql.len() + 64);
    let mut out_args = Vec::with_capacity(args.len() + insertions.len());
    let mut appended = Vec::new();
    let mut caller_args = args.into_iter();
    let mut mark = 0;
    let mut pos = 0;

    for insertion in insertions {
        if interleave {
            while mark < marks.len() && marks[mark] < insertion.offset {
                out_args.extend(caller_args.next());
                mark += 1;
            }
        }
        out.push_str(&sql[pos..insertion.offset]);
        pos = insertion.offset;
        for fragment in insertion.fragments {
            match fragment {
                Fragment::Sql(text) => out.push_str(&text),
                Fragment::Param(value) => {
                    out.push('?');
                    if interleave {
                        out_args.push(value);
                    } else {
                        appended.push(value);
                    }
                }
            }
        }
    }
    out.push_str(&sql[pos..]);
    out_args.extend(caller_args);

    if !appended.is_empty() {
        warnings.push(format!(
            "statement has {} '?' placeholder(s) but {} argument(s) were supplied; injected arguments appended",
            marks.len(),
            out_args.len()
        ));
        out_args.extend(appended);
    }

    Assembled {
        sql: out,
        args: out_args,
        warnings,
    }
}

fn placeholder_number(text: &str, dialect: Dialect) -> Option<usize> {
    let digits = match dialect {
        Dialect::Dollar => text.strip_prefix('$')?,
        Dialect::AtP => text
            .strip_prefix("@p")
            .or_else(|| text.strip_prefix("@P"))?,
        Dialect::QuestionMark => return None,
    };
    digits.parse().ok()
}

fn assemble_numbered(toks: &Tokens<'_>, insertions: Vec<Insertion>, dialect: Dialect, mut args: Vec<Value>) -> Assembled {
    let sql = toks.sql();
    let highest = toks
        .placeholders(0..toks.len())
        .filter_map(|(_, text)| placeholder_number(text, dialect))
        .max()
        .unwrap_or(0);

    let mut warnings = Vec::new();
    let has_params = insertions
        .iter()
        .any(|ins| ins.fragments.iter().any(|f| matches!(f, Fragment::Param(_))));
    if has_params && highest != args.len() {
        warnings.push(format!(
            "statement uses placeholders up to {} but {} argument(s) were supplied",
            dialect.placeholder(highest.max(1)),
            args.len()
        ));
    }

    let mut next = highest.max(args.len());
    let mut out = String::with_capacity(sql.len() + 64);
    let mut pos = 0;
    for insertion in insertions {
        out.push_str(&sql[pos..insertion.offset]);
        pos = insertion.offset;
        for fragment in insertion.fragments {
            match fragment {
                Fragment::Sql(text) => out.push_str(&text),
                Fragment::Param(value) => {
                    next += 1;
                    out.push_str(&dialect.placeholder(next));
                    args.push(value);
                }
            }
        }
    }
    out.push_str(&sql[pos..]);

    Assembled {
        sql: out,
        args,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::tables::discover;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn predicate(qualifier: &str, column: &str, value: Value) -> Vec<Fragment> {
        vec![
            Fragment::Sql(format!("{}.{} = ", qualifier, column)),
            Fragment::Param(value),
        ]
    }

    /// Scope every table of the first scope with `user_id`.
    fn scope_first(sql: &str, dialect: Dialect, args: Vec<Value>) -> Assembled {
        let toks = Tokens::new(sql, dialect);
        let classification = classify(&toks, 0..toks.len());
        let discovery = discover(&toks, 0..toks.len(), &classification);
        let predicates = discovery
            .tables
            .iter()
            .filter(|t| t.scope == Some(0))
            .map(|t| predicate(t.qualifier(), "user_id", json!("u1")))
            .collect();
        let insertions = filter_insertions(&toks, &discovery.scopes[0], predicates);
        assemble(&toks, insertions, dialect, args)
    }

    #[test]
    fn test_insert_where_without_existing() {
        let out = scope_first("SELECT * FROM pipelines", Dialect::QuestionMark, vec![]);
        assert_eq!(out.sql, "SELECT * FROM pipelines WHERE (pipelines.user_id = ?)");
        assert_eq!(out.args, vec![json!("u1")]);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_append_to_existing_where() {
        let out = scope_first(
            "SELECT * FROM pipelines WHERE name LIKE ?",
            Dialect::QuestionMark,
            vec![json!("%a%")],
        );
        assert_eq!(
            out.sql,
            "SELECT * FROM pipelines WHERE name LIKE ? AND (pipelines.user_id = ?)"
        );
        assert_eq!(out.args, vec![json!("%a%"), json!("u1")]);
    }

    #[test]
    fn test_wraps_top_level_or() {
        let out = scope_first(
            "SELECT * FROM t WHERE a = 1 OR b = 2 ORDER BY a",
            Dialect::QuestionMark,
            vec![],
        );
        assert_eq!(
            out.sql,
            "SELECT * FROM t WHERE (a = 1 OR b = 2) AND (t.user_id = ?) ORDER BY a"
        );
    }

    #[test]
    fn test_nested_or_is_not_wrapped() {
        let out = scope_first("SELECT * FROM t WHERE (a = 1 OR b = 2)", Dialect::QuestionMark, vec![]);
        assert_eq!(out.sql, "SELECT * FROM t WHERE (a = 1 OR b = 2) AND (t.user_id = ?)");
    }

    #[test]
    fn test_insert_before_tail_clauses() {
        let out = scope_first(
            "SELECT p.name, count(*) FROM pipelines p GROUP BY p.name HAVING count(*) > ? LIMIT 5",
            Dialect::QuestionMark,
            vec![json!(1)],
        );
        assert_eq!(
            out.sql,
            "SELECT p.name, count(*) FROM pipelines p WHERE (p.user_id = ?) GROUP BY p.name HAVING count(*) > ? LIMIT 5"
        );
        assert_eq!(out.args, vec![json!("u1"), json!(1)]);
    }

    #[test]
    fn test_multiple_tables_share_one_where() {
        let out = scope_first(
            "SELECT * FROM pipelines p JOIN runs r ON r.pid = p.id",
            Dialect::QuestionMark,
            vec![],
        );
        assert_eq!(
            out.sql,
            "SELECT * FROM pipelines p JOIN runs r ON r.pid = p.id WHERE (p.user_id = ?) AND (r.user_id = ?)"
        );
    }

    #[test]
    fn test_trailing_comment_survives() {
        let out = scope_first("SELECT * FROM t -- list\n", Dialect::QuestionMark, vec![]);
        assert_eq!(out.sql, "SELECT * FROM t WHERE (t.user_id = ?) -- list\n");
    }

    #[test]
    fn test_dollar_numbering_continues() {
        let out = scope_first(
            "SELECT * FROM t WHERE a = $1 AND b = $2",
            Dialect::Dollar,
            vec![json!(1), json!(2)],
        );
        assert_eq!(
            out.sql,
            "SELECT * FROM t WHERE a = $1 AND b = $2 AND (t.user_id = $3)"
        );
        assert_eq!(out.args, vec![json!(1), json!(2), json!("u1")]);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_at_p_numbering() {
        let out = scope_first("SELECT * FROM t WHERE a = @p1", Dialect::AtP, vec![json!(1)]);
        assert_eq!(out.sql, "SELECT * FROM t WHERE a = @p1 AND (t.user_id = @p2)");
    }

    #[test]
    fn test_question_mark_count_mismatch_appends() {
        let out = scope_first(
            "SELECT * FROM t WHERE a = ? ORDER BY ?",
            Dialect::QuestionMark,
            vec![json!(1)],
        );
        assert_eq!(out.args, vec![json!(1), json!("u1")]);
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_update_and_delete_sites() {
        let out = scope_first("UPDATE t SET a = ? RETURNING id", Dialect::QuestionMark, vec![json!(1)]);
        assert_eq!(out.sql, "UPDATE t SET a = ? WHERE (t.user_id = ?) RETURNING id");
        assert_eq!(out.args, vec![json!(1), json!("u1")]);

        let out = scope_first("DELETE FROM t WHERE id = ?", Dialect::QuestionMark, vec![json!(9)]);
        assert_eq!(out.sql, "DELETE FROM t WHERE id = ? AND (t.user_id = ?)");
    }
}

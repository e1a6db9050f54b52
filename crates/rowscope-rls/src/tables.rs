//! Table and alias discovery.
//!
//! Walks a classified statement and records every base table it reads or
//! writes, together with the *filter scope* that owns it: the `SELECT`,
//! `UPDATE` or `DELETE` whose `WHERE` clause receives that table's
//! predicate. CTE bodies, derived tables, set-operation arms and
//! subqueries anywhere in the statement get scopes of their own.

use std::ops::Range;

use crate::classifier::{Classification, Shape, Target, parse_cte_header};
use crate::lexer::{TokenKind, Tokens};

/// Words that can never be an implicit alias.
const RESERVED: &[&str] = &[
    "ALL", "AND", "APPLY", "AS", "CROSS", "DISTINCT", "EXCEPT", "FETCH", "FOR", "FORCE", "FROM",
    "FULL", "GROUP", "HAVING", "IGNORE", "INNER", "INTERSECT", "INTO", "JOIN", "LATERAL", "LEFT",
    "LIMIT", "LOCK", "MINUS", "NATURAL", "NOT", "OFFSET", "ON", "ONLY", "OPTION", "OR", "ORDER",
    "OUTER", "OUTPUT", "PARTITION", "QUALIFY", "RETURNING", "RIGHT", "SELECT", "SET",
    "STRAIGHT_JOIN", "TABLE", "TABLESAMPLE", "UNION", "USE", "USING", "VALUES", "WHERE", "WINDOW",
    "WITH",
];

/// Keywords that end a `FROM` list.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "FETCH", "FOR", "WINDOW", "QUALIFY",
    "RETURNING", "OPTION", "SET",
];

/// Keywords followed by a table factor.
const TABLE_INTRODUCERS: &[&str] = &["FROM", "JOIN", "APPLY", "STRAIGHT_JOIN"];

/// SQL Server table hints.
const TABLE_HINTS: &[&str] = &[
    "NOLOCK", "READUNCOMMITTED", "READCOMMITTED", "READCOMMITTEDLOCK", "REPEATABLEREAD",
    "SERIALIZABLE", "SNAPSHOT", "HOLDLOCK", "UPDLOCK", "XLOCK", "TABLOCK", "TABLOCKX", "PAGLOCK",
    "ROWLOCK", "NOWAIT", "READPAST", "NOEXPAND", "INDEX", "FORCESEEK", "FORCESCAN",
    "KEEPIDENTITY", "KEEPDEFAULTS", "IGNORE_CONSTRAINTS", "IGNORE_TRIGGERS",
];

const SET_OPERATORS: &[&str] = &["UNION", "INTERSECT", "EXCEPT", "MINUS"];

/// Keywords after which an unclassifiable statement names a table.
const LOOSE_TABLE_KEYWORDS: &[&str] = &["FROM", "JOIN", "INTO", "UPDATE", "TABLE", "TRUNCATE", "USING"];

/// What kind of statement owns a filter scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Select,
    Update,
    Delete,
}

/// A region whose `WHERE` clause receives predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterScope {
    pub kind: ScopeKind,
    /// First token scanned for `WHERE` and the clause tail.
    pub start: usize,
    /// One past the last token of the scope.
    pub end: usize,
}

/// One table occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Lowercased, unquoted, dot-joined name used for rule lookup.
    pub name: String,
    /// The name as written.
    pub reference: String,
    /// Alias as written.
    pub alias: Option<String>,
    /// Index into [`Discovery::scopes`]; `None` for loose discovery.
    pub scope: Option<usize>,
}

impl TableRef {
    /// The identifier predicates use to qualify columns: the alias if there
    /// is one, else the table reference as written.
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.reference)
    }

    /// Last segment of the normalized name.
    pub fn unqualified(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Scopes and tables of one statement, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub scopes: Vec<FilterScope>,
    pub tables: Vec<TableRef>,
}

/// Discover the tables of a classified statement.
///
/// Unknown shapes yield no scopes; use [`discover_loose`] for those.
pub fn discover(toks: &Tokens<'_>, range: Range<usize>, classification: &Classification) -> Discovery {
    let mut walker = Walker {
        toks,
        discovery: Discovery::default(),
    };
    match &classification.shape {
        Shape::Select | Shape::Cte(_) => walker.query(range.start, range.end, &[]),
        Shape::Update(target) => walker.dml(ScopeKind::Update, target, range.end),
        Shape::Delete(target) => walker.dml(ScopeKind::Delete, target, range.end),
        Shape::Unknown(_) => {}
    }
    walker.discovery
}

/// Best-effort table names for statements the classifier could not shape.
///
/// Only used to decide whether an unknown statement touches a protected
/// table; nothing is ever injected into these.
pub fn discover_loose(toks: &Tokens<'_>, range: Range<usize>) -> Vec<TableRef> {
    let mut tables = Vec::new();
    let mut i = range.start;
    while i < range.end {
        if toks.is_any_kw(i, LOOSE_TABLE_KEYWORDS) {
            let mut j = i + 1;
            while j < range.end && toks.is_any_kw(j, &["IF", "NOT", "EXISTS", "ONLY", "TABLE"]) {
                j += 1;
            }
            if let Some(end) = read_name(toks, j, range.end) {
                tables.push(table_ref(toks, j..end, None, None));
                i = end;
                continue;
            }
        }
        i += 1;
    }
    tables
}

/// Read a possibly qualified name starting at `i`; returns the index after it.
pub(crate) fn read_name(toks: &Tokens<'_>, i: usize, hi: usize) -> Option<usize> {
    if i >= hi || !is_name_part(toks, i) {
        return None;
    }
    let mut end = i + 1;
    while end + 1 < hi && toks.kind(end) == Some(TokenKind::Dot) && is_name_part(toks, end + 1) {
        end += 2;
    }
    Some(end)
}

fn is_name_part(toks: &Tokens<'_>, i: usize) -> bool {
    match toks.kind(i) {
        Some(TokenKind::QuotedIdent) => true,
        Some(TokenKind::Word) => !toks.is_any_kw(i, RESERVED),
        _ => false,
    }
}

/// Read an optional alias at `i`, with an optional column list after it.
pub(crate) fn read_alias(toks: &Tokens<'_>, i: usize, hi: usize) -> (Option<usize>, usize) {
    if i >= hi {
        return (None, i);
    }
    let alias = if toks.is_kw(i, "AS") {
        match toks.kind(i + 1) {
            Some(TokenKind::Word) | Some(TokenKind::QuotedIdent) if i + 1 < hi => Some(i + 1),
            _ => return (None, i + 1),
        }
    } else if is_name_part(toks, i) {
        Some(i)
    } else {
        None
    };
    match alias {
        Some(a) => {
            let next = a + 1;
            let next = if next < hi && toks.kind(next) == Some(TokenKind::LParen) {
                toks.skip(next).min(hi)
            } else {
                next
            };
            (Some(a), next)
        }
        None => (None, i),
    }
}

/// Strip identifier quoting.
pub(crate) fn unquote(part: &str) -> &str {
    let bytes = part.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'`' && last == b'`') || (first == b'[' && last == b']') {
            return &part[1..part.len() - 1];
        }
    }
    part
}

fn table_ref(toks: &Tokens<'_>, name: Range<usize>, alias: Option<usize>, scope: Option<usize>) -> TableRef {
    let sql = toks.sql();
    let first = toks.get(name.start).map(|t| t.start).unwrap_or(0);
    let last = toks.get(name.end - 1).map(|t| t.end).unwrap_or(first);
    let normalized = name
        .clone()
        .filter(|&i| toks.kind(i) != Some(TokenKind::Dot))
        .map(|i| unquote(toks.text(i)).to_lowercase())
        .collect::<Vec<_>>()
        .join(".");
    TableRef {
        name: normalized,
        reference: sql[first..last].to_string(),
        alias: alias.map(|a| toks.text(a).to_string()),
        scope,
    }
}

/// Whether `lo..hi` is a comma-separated list of table hints, each
/// optionally followed by `(args)` or `= value`.
fn is_hint_list(toks: &Tokens<'_>, lo: usize, hi: usize) -> bool {
    if lo >= hi {
        return false;
    }
    let mut i = lo;
    loop {
        if !toks.is_any_kw(i, TABLE_HINTS) {
            return false;
        }
        i += 1;
        if i < hi && toks.kind(i) == Some(TokenKind::LParen) {
            i = toks.skip(i);
        } else if i < hi && toks.text(i) == "=" {
            i += 2;
        }
        if i >= hi {
            return i == hi;
        }
        if toks.kind(i) != Some(TokenKind::Comma) {
            return false;
        }
        i += 1;
    }
}

/// How [`Walker::clauses`] starts scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clauses {
    /// A select or update scope.
    Query,
    /// A delete scope, where `USING` introduces a table list.
    DeleteTail,
    /// The inside of a parenthesized join; a table comes first.
    JoinGroup,
}

struct Walker<'t, 'a> {
    toks: &'t Tokens<'a>,
    discovery: Discovery,
}

impl Walker<'_, '_> {
    fn push_scope(&mut self, kind: ScopeKind, start: usize, end: usize) -> usize {
        self.discovery.scopes.push(FilterScope { kind, start, end });
        self.discovery.scopes.len() - 1
    }

    /// A query expression: optional `WITH`, then set-operation arms.
    fn query(&mut self, lo: usize, hi: usize, ctes: &[String]) {
        if lo >= hi {
            return;
        }
        if self.toks.is_kw(lo, "WITH") {
            match parse_cte_header(self.toks, lo..hi) {
                Some(header) => {
                    // A body sees the CTEs declared before it, and itself
                    // only under RECURSIVE; otherwise its name is the base table.
                    let mut visible = ctes.to_vec();
                    for (name, body) in header.names.iter().zip(&header.bodies) {
                        if header.recursive {
                            let mut own = visible.clone();
                            own.push(name.clone());
                            self.query(body.start, body.end, &own);
                        } else {
                            self.query(body.start, body.end, &visible);
                        }
                        visible.push(name.clone());
                    }
                    self.query(header.main.start, header.main.end, &visible);
                }
                None => self.descend(lo, hi, ctes),
            }
            return;
        }
        for arm in self.set_operation_arms(lo, hi) {
            let first = arm.start;
            if self.toks.kind(first) == Some(TokenKind::LParen) {
                match self.toks.matching(first).filter(|&m| m < arm.end) {
                    Some(close) => {
                        self.query(first + 1, close, ctes);
                        self.descend(close + 1, arm.end, ctes);
                    }
                    None => self.descend(arm.start, arm.end, ctes),
                }
            } else if self.toks.is_kw(first, "SELECT") {
                self.select(arm.start, arm.end, ctes);
            } else {
                self.descend(arm.start, arm.end, ctes);
            }
        }
    }

    fn set_operation_arms(&self, lo: usize, hi: usize) -> Vec<Range<usize>> {
        let mut arms = Vec::new();
        let mut start = lo;
        let mut i = lo;
        while i < hi {
            if self.toks.is_any_kw(i, SET_OPERATORS) {
                arms.push(start..i);
                i += 1;
                if self.toks.is_any_kw(i, &["ALL", "DISTINCT"]) {
                    i += 1;
                }
                start = i;
                continue;
            }
            i = self.toks.skip(i);
        }
        arms.push(start..hi);
        arms.retain(|arm| !arm.is_empty());
        arms
    }

    fn select(&mut self, lo: usize, hi: usize, ctes: &[String]) {
        let scope = self.push_scope(ScopeKind::Select, lo + 1, hi);
        self.clauses(scope, lo + 1, hi, ctes, Clauses::Query);
    }

    fn dml(&mut self, kind: ScopeKind, target: &Target, hi: usize) {
        let scope = self.push_scope(kind, target.rest, hi);
        let table = table_ref(self.toks, target.name.clone(), target.alias, Some(scope));
        self.discovery.tables.push(table);
        let mode = if kind == ScopeKind::Delete {
            Clauses::DeleteTail
        } else {
            Clauses::Query
        };
        self.clauses(scope, target.rest, hi, &[], mode);
    }

    /// Recurse into every paren group in `lo..hi` that holds a query.
    fn descend(&mut self, lo: usize, hi: usize, ctes: &[String]) {
        let mut i = lo;
        while i < hi {
            if self.toks.kind(i) == Some(TokenKind::LParen) {
                if let Some(close) = self.toks.matching(i).filter(|&m| m < hi) {
                    self.group(i + 1, close, ctes);
                    i = close + 1;
                    continue;
                }
            }
            i += 1;
        }
    }

    fn group(&mut self, lo: usize, hi: usize, ctes: &[String]) {
        if self.toks.is_any_kw(lo, &["SELECT", "WITH"]) {
            self.query(lo, hi, ctes);
        } else {
            self.descend(lo, hi, ctes);
        }
    }

    /// Scan the clauses of one scope, collecting `FROM`/`JOIN` tables.
    fn clauses(&mut self, scope: usize, from: usize, hi: usize, ctes: &[String], mode: Clauses) {
        let toks = self.toks;
        let mut in_from = mode == Clauses::JoinGroup;
        let mut expect_table = in_from;
        let mut i = from;
        while i < hi {
            match toks.kind(i) {
                Some(TokenKind::LParen) => {
                    let Some(close) = toks.matching(i).filter(|&m| m < hi) else {
                        i += 1;
                        continue;
                    };
                    if expect_table && !toks.is_any_kw(i + 1, &["SELECT", "WITH"]) {
                        // `FROM (a JOIN b ON ...)`: the tables belong to this scope.
                        self.clauses(scope, i + 1, close, ctes, Clauses::JoinGroup);
                    } else {
                        self.group(i + 1, close, ctes);
                    }
                    if expect_table {
                        expect_table = false;
                        i = read_alias(toks, close + 1, hi).1;
                    } else {
                        i = close + 1;
                    }
                    continue;
                }
                Some(TokenKind::Comma) if in_from => expect_table = true,
                Some(TokenKind::Word) => {
                    let distinct_from = toks.is_kw(i, "FROM") && i > from && toks.is_kw(i - 1, "DISTINCT");
                    if toks.is_any_kw(i, TABLE_INTRODUCERS) && !distinct_from {
                        in_from = true;
                        expect_table = true;
                    } else if mode == Clauses::DeleteTail && toks.is_kw(i, "USING") && !in_from {
                        in_from = true;
                        expect_table = true;
                    } else if expect_table && toks.is_any_kw(i, &["LATERAL", "ONLY"]) {
                        // modifier; the table follows
                    } else if toks.is_any_kw(i, CLAUSE_KEYWORDS) {
                        in_from = false;
                        expect_table = false;
                    } else if toks.is_any_kw(i, &["ON", "USING"]) {
                        expect_table = false;
                    } else if expect_table && is_name_part(toks, i) {
                        i = self.table_factor(scope, i, hi, ctes);
                        expect_table = false;
                        continue;
                    }
                }
                Some(TokenKind::QuotedIdent) if expect_table => {
                    i = self.table_factor(scope, i, hi, ctes);
                    expect_table = false;
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// A named table factor; returns the index after its alias.
    fn table_factor(&mut self, scope: usize, i: usize, hi: usize, ctes: &[String]) -> usize {
        let toks = self.toks;
        let Some(name_end) = read_name(toks, i, hi) else {
            return i + 1;
        };

        // `fn(args)` with no space before the paren is a table function,
        // unless the parens hold table hints: `t(NOLOCK)`, `t (NOLOCK)`.
        let mut after = name_end;
        if name_end < hi && toks.kind(name_end) == Some(TokenKind::LParen) {
            let Some(close) = toks.matching(name_end).filter(|&m| m < hi) else {
                return name_end + 1;
            };
            if is_hint_list(toks, name_end + 1, close) {
                after = close + 1;
            } else if toks.is_glued(name_end) {
                self.descend(name_end + 1, close, ctes);
                return read_alias(toks, close + 1, hi).1;
            }
        }

        let (alias, next) = read_alias(toks, after, hi);
        let table = table_ref(toks, i..name_end, alias, Some(scope));
        let is_cte = name_end == i + 1 && ctes.iter().any(|c| *c == table.name);
        if !is_cte {
            self.discovery.tables.push(table);
        }
        next
    }
}

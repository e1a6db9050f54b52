//! SQL tokenizer and statement splitter.
//!
//! Tokenization is delegated to `sqlparser`'s tokenizer for the dialect
//! family behind the placeholder style, so string literals end exactly where
//! the database ends them (backslash escapes in MySQL, `E'...'` and
//! dollar quoting in Postgres, `[...]` identifiers in SQL Server). Its
//! line/column locations are mapped back to byte spans of the original
//! text. Whitespace and comments are dropped, so comments (including the
//! bypass token) stay untouched in the source string.

use std::ops::Range;

use rowscope_core::Dialect;
use sqlparser::dialect::{
    Dialect as SqlDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect,
};
use sqlparser::tokenizer::{Location, Token as SqlToken, TokenWithSpan, Tokenizer};

/// Token categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted identifier or keyword.
    Word,
    /// `"ident"`, `` `ident` `` or `[ident]`.
    QuotedIdent,
    /// `'text'`, `E'text'`, `N'text'` or `$tag$text$tag$`.
    String,
    Number,
    /// `?`, `$1`, `@p1`, `@name`.
    Placeholder,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    /// Any other punctuation or operator.
    Operator,
}

/// A token and its byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.start..self.end]
    }
}

/// Tokenized SQL with paren matching.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    sql: &'a str,
    tokens: Vec<Token>,
    matching: Vec<Option<usize>>,
    unterminated: bool,
}

impl<'a> Tokens<'a> {
    /// Tokenize `sql` with the lexical rules of `dialect`'s database family.
    pub fn new(sql: &'a str, dialect: Dialect) -> Self {
        let (tokens, unterminated) = lex(sql, lexical_dialect(dialect));
        let matching = match_parens(&tokens);
        Self {
            sql,
            tokens,
            matching,
            unterminated,
        }
    }

    pub fn sql(&self) -> &'a str {
        self.sql
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn get(&self, idx: usize) -> Option<&Token> {
        self.tokens.get(idx)
    }

    pub fn kind(&self, idx: usize) -> Option<TokenKind> {
        self.tokens.get(idx).map(|t| t.kind)
    }

    pub fn text(&self, idx: usize) -> &'a str {
        self.tokens
            .get(idx)
            .map(|t| t.text(self.sql))
            .unwrap_or("")
    }

    /// Whether token `idx` is the unquoted keyword `kw` (case-insensitive).
    pub fn is_kw(&self, idx: usize, kw: &str) -> bool {
        self.kind(idx) == Some(TokenKind::Word) && self.text(idx).eq_ignore_ascii_case(kw)
    }

    /// Whether token `idx` is one of the keywords in `kws`.
    pub fn is_any_kw(&self, idx: usize, kws: &[&str]) -> bool {
        self.kind(idx) == Some(TokenKind::Word)
            && kws.iter().any(|kw| self.text(idx).eq_ignore_ascii_case(kw))
    }

    /// Whether token `idx` directly follows token `idx - 1` with nothing in between.
    pub fn is_glued(&self, idx: usize) -> bool {
        match (idx.checked_sub(1).and_then(|p| self.get(p)), self.get(idx)) {
            (Some(prev), Some(tok)) => prev.end == tok.start,
            _ => false,
        }
    }

    /// Index of the paren matching the one at `idx`.
    pub fn matching(&self, idx: usize) -> Option<usize> {
        self.matching.get(idx).copied().flatten()
    }

    /// Whether an opening or closing paren in `range` has no partner in it,
    /// or a literal or comment runs off the end of the input.
    pub fn is_malformed(&self, range: Range<usize>) -> bool {
        if self.unterminated && range.end == self.tokens.len() {
            return true;
        }
        range.clone().any(|i| match self.kind(i) {
            Some(TokenKind::LParen) | Some(TokenKind::RParen) => match self.matching(i) {
                Some(m) => !range.contains(&m),
                None => true,
            },
            _ => false,
        })
    }

    /// Index just past the group starting at `idx` if it is an `(`, else `idx + 1`.
    pub fn skip(&self, idx: usize) -> usize {
        match self.kind(idx) {
            Some(TokenKind::LParen) => self.matching(idx).map(|m| m + 1).unwrap_or(idx + 1),
            _ => idx + 1,
        }
    }

    /// Split into top-level statements on `;` outside parens.
    ///
    /// Input whose trailing literal or comment never closes still yields a
    /// final statement for the tokens before it, even when there are none.
    pub fn statements(&self) -> Vec<StatementSpan> {
        let mut spans = Vec::new();
        let mut depth = 0usize;
        let mut first = 0usize;
        let mut segment_start = 0usize;
        for (i, tok) in self.tokens.iter().enumerate() {
            match tok.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth = depth.saturating_sub(1),
                TokenKind::Semicolon if depth == 0 => {
                    if i > first {
                        spans.push(self.span(first..i, segment_start..tok.start));
                    }
                    first = i + 1;
                    segment_start = tok.end;
                }
                _ => {}
            }
        }
        if first < self.tokens.len() {
            spans.push(self.span(first..self.tokens.len(), segment_start..self.sql.len()));
        } else if self.unterminated {
            let len = self.tokens.len();
            spans.push(StatementSpan {
                tokens: len..len,
                bytes: segment_start..self.sql.len(),
                segment: segment_start..self.sql.len(),
            });
        }
        spans
    }

    fn span(&self, tokens: Range<usize>, segment: Range<usize>) -> StatementSpan {
        let start = self.tokens[tokens.start].start;
        let end = if self.unterminated && tokens.end == self.tokens.len() {
            self.sql.len()
        } else {
            self.tokens[tokens.end - 1].end
        };
        StatementSpan {
            tokens,
            bytes: start..end,
            segment,
        }
    }

    /// Placeholder tokens in `range`.
    pub fn placeholders(&self, range: Range<usize>) -> impl Iterator<Item = (usize, &'a str)> + '_ {
        range
            .filter(move |&i| self.kind(i) == Some(TokenKind::Placeholder))
            .map(move |i| (i, self.text(i)))
    }
}

/// One top-level statement: its token indices and byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementSpan {
    pub tokens: Range<usize>,
    pub bytes: Range<usize>,
    /// Bytes between the surrounding separators, comments included.
    pub segment: Range<usize>,
}

/// Split `sql` into the text of its top-level statements.
pub fn split_statements(sql: &str, dialect: Dialect) -> Vec<&str> {
    Tokens::new(sql, dialect)
        .statements()
        .into_iter()
        .map(|s| &sql[s.bytes])
        .collect()
}

/// The `sqlparser` dialect whose lexical rules match a placeholder style.
///
/// `?` drivers are lexed as MySQL: backslash escapes are honored, and a
/// literal that only closes under those rules is treated as unterminated.
fn lexical_dialect(dialect: Dialect) -> &'static dyn SqlDialect {
    match dialect {
        Dialect::QuestionMark => &MySqlDialect {},
        Dialect::Dollar => &PostgreSqlDialect {},
        Dialect::AtP => &MsSqlDialect {},
    }
}

/// Tokenize, cutting the input back to the start of any literal or comment
/// that never closes.
fn lex(sql: &str, dialect: &dyn SqlDialect) -> (Vec<Token>, bool) {
    let mut end = sql.len();
    let mut unterminated = false;
    loop {
        let text = &sql[..end];
        match Tokenizer::new(dialect, text).tokenize_with_location() {
            Ok(spanned) => return (convert(text, &spanned), unterminated),
            Err(err) => {
                unterminated = true;
                let at = ByteCursor::new(text).offset(err.location);
                end = if at < end {
                    at
                } else {
                    match last_opener(text) {
                        Some(open) => open,
                        None => return (Vec::new(), true),
                    }
                };
            }
        }
    }
}

/// Byte offset of the last character that can open a literal or comment.
fn last_opener(text: &str) -> Option<usize> {
    let quote = text.rfind(['\'', '"', '`', '[', '$']);
    let comment = text.rfind("/*");
    quote.max(comment)
}

fn convert(sql: &str, spanned: &[TokenWithSpan]) -> Vec<Token> {
    let mut cursor = ByteCursor::new(sql);
    let mut tokens = Vec::with_capacity(spanned.len());
    for item in spanned {
        let start = cursor.offset(item.span.start);
        let end = cursor.offset(item.span.end);
        if start >= end {
            continue;
        }
        if let Some(kind) = token_kind(&item.token, &sql[start..end]) {
            tokens.push(Token { kind, start, end });
        }
    }
    tokens
}

fn token_kind(token: &SqlToken, text: &str) -> Option<TokenKind> {
    let kind = match token {
        SqlToken::EOF | SqlToken::Whitespace(_) => return None,
        SqlToken::Word(word) if word.quote_style.is_some() => TokenKind::QuotedIdent,
        // SQL Server and MySQL lex `@name` as a word.
        SqlToken::Word(_) if text.starts_with('@') => TokenKind::Placeholder,
        SqlToken::Word(_) => TokenKind::Word,
        SqlToken::Number(..) => TokenKind::Number,
        SqlToken::Placeholder(_) => TokenKind::Placeholder,
        SqlToken::LParen => TokenKind::LParen,
        SqlToken::RParen => TokenKind::RParen,
        SqlToken::Comma => TokenKind::Comma,
        SqlToken::Period => TokenKind::Dot,
        SqlToken::SemiColon => TokenKind::Semicolon,
        _ => literal_kind(text),
    };
    Some(kind)
}

/// Kind of a token the tokenizer reports as a literal or punctuation.
fn literal_kind(text: &str) -> TokenKind {
    if text.starts_with('"') {
        // MySQL double-quoted strings can only name tables in ANSI_QUOTES
        // mode; treating them as identifiers errs towards scoping.
        TokenKind::QuotedIdent
    } else if text.contains('\'') || (text.len() > 1 && text.starts_with('$') && text.ends_with('$')) {
        TokenKind::String
    } else if text.starts_with('?') && text[1..].bytes().all(|b| b.is_ascii_digit()) {
        TokenKind::Placeholder
    } else {
        TokenKind::Operator
    }
}

/// Maps the tokenizer's 1-based line/column locations to byte offsets.
///
/// Columns count characters. Lookups are expected in ascending order; an
/// earlier location restarts the scan.
struct ByteCursor<'a> {
    sql: &'a str,
    line: u64,
    column: u64,
    byte: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            sql,
            line: 1,
            column: 1,
            byte: 0,
        }
    }

    fn offset(&mut self, location: Location) -> usize {
        let target = (location.line, location.column);
        if target < (self.line, self.column) {
            *self = Self::new(self.sql);
        }
        let sql = self.sql;
        for ch in sql[self.byte..].chars() {
            if (self.line, self.column) >= target {
                break;
            }
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.byte += ch.len_utf8();
        }
        self.byte
    }
}

fn match_parens(tokens: &[Token]) -> Vec<Option<usize>> {
    let mut matching = vec![None; tokens.len()];
    let mut stack = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::LParen => stack.push(i),
            TokenKind::RParen => {
                if let Some(open) = stack.pop() {
                    matching[open] = Some(i);
                    matching[i] = Some(open);
                }
            }
            _ => {}
        }
    }
    matching
}

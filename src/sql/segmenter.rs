//! Splits SQL text into literal segments and placeholder references.

use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;

use super::lexer::{LexOptions, Lexer, PlaceholderToken, Token};
use super::Dialect;
use crate::error::ParseError;

/// Options that change how text is segmented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmenterOptions {
    pub dollar_only: bool,
    pub no_colons: bool,
    pub escape_placeholders: bool,
    pub standard_conforming_strings: bool,
    /// Skip lexing entirely; the text is sent as-is.
    pub direct: bool,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            dollar_only: false,
            no_colons: false,
            escape_placeholders: true,
            standard_conforming_strings: true,
            direct: false,
        }
    }
}

impl SegmenterOptions {
    fn lex_options(&self) -> LexOptions {
        LexOptions {
            question_marks: !self.dollar_only,
            colons: !self.dollar_only && !self.no_colons,
            escape_placeholders: self.escape_placeholders,
            standard_strings: self.standard_conforming_strings,
        }
    }
}

/// Identity of one distinct placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlaceholderId {
    /// `?` or `$N`, 1-based.
    Ordinal(usize),
    /// `:name`, stored without the colon.
    Named(String),
}

impl fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceholderId::Ordinal(n) => write!(f, "${}", n),
            PlaceholderId::Named(name) => write!(f, ":{}", name),
        }
    }
}

/// Literal text followed by an optional placeholder (index into `Template::placeholders`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub placeholder: Option<usize>,
}

/// Parsed, immutable form of one SQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    sql: String,
    segments: Vec<Segment>,
    placeholders: Vec<PlaceholderId>,
    dialect: Option<Dialect>,
    is_dml: bool,
    direct: bool,
}

impl Template {
    #[inline]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[inline]
    pub fn placeholders(&self) -> &[PlaceholderId] {
        &self.placeholders
    }

    #[inline]
    pub fn placeholder_count(&self) -> usize {
        self.placeholders.len()
    }

    #[inline]
    pub fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    /// Statement class eligible for server-side preparation.
    #[inline]
    pub fn is_dml(&self) -> bool {
        self.is_dml
    }

    #[inline]
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    /// The statement with every placeholder written as `$k`.
    pub fn numbered_sql(&self) -> String {
        if self.direct {
            return self.sql.clone();
        }
        let mut out = String::with_capacity(self.sql.len() + self.segments.len() * 2);
        for segment in &self.segments {
            out.push_str(&segment.text);
            if let Some(index) = segment.placeholder {
                let _ = write!(out, "${}", index + 1);
            }
        }
        out
    }

    /// The statement with each placeholder replaced by a pre-quoted literal.
    ///
    /// `literals` is indexed like `placeholders()`.
    pub fn substitute<S: AsRef<str>>(&self, literals: &[S]) -> String {
        if self.direct {
            return self.sql.clone();
        }
        let extra: usize = literals.iter().map(|l| l.as_ref().len()).sum();
        let mut out = String::with_capacity(self.sql.len() + extra);
        for segment in &self.segments {
            out.push_str(&segment.text);
            if let Some(literal) = segment.placeholder.and_then(|i| literals.get(i)) {
                let literal = literal.as_ref();
                if needs_separator(&out, literal) {
                    out.push(' ');
                }
                out.push_str(literal);
            }
        }
        out
    }
}

/// A signed literal right after an operator character would fuse with it:
/// `a-` + `-5` opens a `--` comment, `a@` + `-5` lexes as the operator `@-`.
fn needs_separator(before: &str, literal: &str) -> bool {
    literal.starts_with(['-', '+'])
        && before.ends_with([
            '+', '-', '*', '/', '<', '>', '=', '~', '!', '@', '#', '%', '^', '&', '|', '`', '?',
        ])
}

/// Segment `sql` into a `Template`.
pub fn segment(sql: &str, opts: &SegmenterOptions) -> Result<Template, ParseError> {
    let is_dml = is_dml(sql);

    if opts.direct || sql.is_empty() {
        return Ok(Template {
            sql: sql.to_string(),
            segments: vec![Segment {
                text: sql.to_string(),
                placeholder: None,
            }],
            placeholders: Vec::new(),
            dialect: None,
            is_dml,
            direct: opts.direct,
        });
    }

    let mut segments = Vec::new();
    let mut placeholders: Vec<PlaceholderId> = Vec::new();
    let mut dialect: Option<Dialect> = None;
    let mut numbers = BTreeSet::new();
    let mut current = String::new();

    for token in Lexer::new(sql, opts.lex_options()) {
        match token? {
            Token::Literal(text) => current.push_str(text),
            Token::Escaped(c) => current.push(c),
            Token::Placeholder(ph) => {
                let found = ph.dialect();
                match dialect {
                    Some(active) if active != found => {
                        return Err(ParseError::MixedDialects { active, found });
                    }
                    _ => dialect = Some(found),
                }

                let index = match ph {
                    PlaceholderToken::Question => {
                        placeholders.push(PlaceholderId::Ordinal(placeholders.len() + 1));
                        placeholders.len() - 1
                    }
                    PlaceholderToken::Numbered(n) => {
                        numbers.insert(n);
                        n - 1
                    }
                    PlaceholderToken::Named(name) => {
                        match placeholders
                            .iter()
                            .position(|p| matches!(p, PlaceholderId::Named(existing) if existing == name))
                        {
                            Some(i) => i,
                            None => {
                                placeholders.push(PlaceholderId::Named(name.to_string()));
                                placeholders.len() - 1
                            }
                        }
                    }
                };

                segments.push(Segment {
                    text: std::mem::take(&mut current),
                    placeholder: Some(index),
                });
            }
        }
    }
    segments.push(Segment {
        text: current,
        placeholder: None,
    });

    if let Some(&max) = numbers.last() {
        if let Some(missing) = (1..=max).find(|n| !numbers.contains(n)) {
            return Err(ParseError::NumberGap { missing, max });
        }
        placeholders = (1..=max).map(PlaceholderId::Ordinal).collect();
    }

    Ok(Template {
        sql: sql.to_string(),
        segments,
        placeholders,
        dialect,
        is_dml,
        direct: false,
    })
}

const DML_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "VALUES", "TABLE", "WITH", "MERGE",
];

/// First keyword, skipping whitespace, comments and opening parentheses.
fn leading_keyword(sql: &str) -> &str {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' | b'(' => i += 1,
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let mut depth = 0usize;
                while i < bytes.len() {
                    match (bytes[i], bytes.get(i + 1)) {
                        (b'/', Some(b'*')) => {
                            depth += 1;
                            i += 2;
                        }
                        (b'*', Some(b'/')) => {
                            depth -= 1;
                            i += 2;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => i += 1,
                    }
                }
            }
            _ => break,
        }
    }
    let start = i.min(bytes.len());
    let len = bytes[start..]
        .iter()
        .take_while(|c| c.is_ascii_alphabetic())
        .count();
    &sql[start..start + len]
}

fn is_dml(sql: &str) -> bool {
    let keyword = leading_keyword(sql);
    DML_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(keyword))
}

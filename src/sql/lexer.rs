//! Placeholder-aware SQL lexer.
//!
//! The lexer does not understand SQL. It only tracks enough lexical state
//! (quotes, comments, dollar quoting, casts) to find placeholder tokens
//! without touching anything inside a quoted or commented region.
//!
//! The input text is never modified: a backslash that escapes a placeholder
//! character is reported as `Token::Escaped` and the segmenter writes the
//! bare character into its own copy of the text.

use super::Dialect;
use crate::error::ParseError;

/// Maximum number of bind parameters a Bind message can carry.
pub const MAX_PARAMETERS: usize = 65_535;

/// Which placeholder syntaxes are live and how strings are escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LexOptions {
    pub question_marks: bool,
    pub colons: bool,
    pub escape_placeholders: bool,
    /// Mirrors the server's `standard_conforming_strings` setting.
    pub standard_strings: bool,
}

impl Default for LexOptions {
    fn default() -> Self {
        Self {
            question_marks: true,
            colons: true,
            escape_placeholders: true,
            standard_strings: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderToken<'a> {
    Question,
    Numbered(usize),
    Named(&'a str),
}

impl PlaceholderToken<'_> {
    pub fn dialect(&self) -> Dialect {
        match self {
            PlaceholderToken::Question => Dialect::QuestionMark,
            PlaceholderToken::Numbered(_) => Dialect::Numbered,
            PlaceholderToken::Named(_) => Dialect::Named,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Verbatim text, quoted regions and comments included.
    Literal(&'a str),
    /// A placeholder character preceded by a backslash; the backslash is dropped.
    Escaped(char),
    Placeholder(PlaceholderToken<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState<'a> {
    Plain,
    SingleQuoted { escapes: bool },
    DoubleQuoted,
    LineComment,
    BlockComment { depth: usize },
    DollarQuoted { tag: &'a str },
}

enum Step<'a> {
    Advance(usize),
    Enter(LexState<'a>, usize),
    Emit { token: Token<'a>, len: usize },
}

/// Iterator over the tokens of one SQL string.
pub struct Lexer<'a> {
    sql: &'a str,
    pos: usize,
    /// Start of the literal span not yet emitted.
    start: usize,
    state: LexState<'a>,
    /// Where the current quoted or commented region opened.
    opened_at: usize,
    opts: LexOptions,
    queued: Option<Token<'a>>,
    finished: bool,
}

#[inline]
fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

#[inline]
fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

impl<'a> Lexer<'a> {
    pub fn new(sql: &'a str, opts: LexOptions) -> Self {
        Self {
            sql,
            pos: 0,
            start: 0,
            state: LexState::Plain,
            opened_at: 0,
            opts,
            queued: None,
            finished: false,
        }
    }

    #[inline]
    fn peek(&self, offset: usize) -> Option<u8> {
        self.sql.as_bytes().get(self.pos + offset).copied()
    }

    #[inline]
    fn prev(&self) -> Option<u8> {
        self.pos
            .checked_sub(1)
            .map(|i| self.sql.as_bytes()[i])
    }

    fn step(&self) -> Result<Step<'a>, ParseError> {
        let bytes = self.sql.as_bytes();
        let b = bytes[self.pos];

        let step = match self.state {
            LexState::Plain => return self.step_plain(b),
            LexState::SingleQuoted { escapes } => match b {
                b'\\' if escapes => Step::Advance(2),
                b'\'' if self.peek(1) == Some(b'\'') => Step::Advance(2),
                b'\'' => Step::Enter(LexState::Plain, 1),
                _ => Step::Advance(1),
            },
            LexState::DoubleQuoted => match b {
                b'"' if self.peek(1) == Some(b'"') => Step::Advance(2),
                b'"' => Step::Enter(LexState::Plain, 1),
                _ => Step::Advance(1),
            },
            LexState::LineComment => match b {
                b'\n' => Step::Enter(LexState::Plain, 1),
                _ => Step::Advance(1),
            },
            LexState::BlockComment { depth } => match (b, self.peek(1)) {
                (b'/', Some(b'*')) => Step::Enter(LexState::BlockComment { depth: depth + 1 }, 2),
                (b'*', Some(b'/')) if depth == 1 => Step::Enter(LexState::Plain, 2),
                (b'*', Some(b'/')) => Step::Enter(LexState::BlockComment { depth: depth - 1 }, 2),
                _ => Step::Advance(1),
            },
            LexState::DollarQuoted { tag } => {
                if bytes[self.pos..].starts_with(tag.as_bytes()) {
                    Step::Enter(LexState::Plain, tag.len())
                } else {
                    Step::Advance(1)
                }
            }
        };
        Ok(step)
    }

    fn step_plain(&self, b: u8) -> Result<Step<'a>, ParseError> {
        let step = match b {
            b'\'' => {
                let escapes = !self.opts.standard_strings || self.has_escape_prefix();
                Step::Enter(LexState::SingleQuoted { escapes }, 1)
            }
            b'"' => Step::Enter(LexState::DoubleQuoted, 1),
            b'-' if self.peek(1) == Some(b'-') => Step::Enter(LexState::LineComment, 2),
            b'/' if self.peek(1) == Some(b'*') => {
                Step::Enter(LexState::BlockComment { depth: 1 }, 2)
            }
            b'\\' if self.opts.escape_placeholders => match self.peek(1) {
                Some(c) if self.is_placeholder_char(c) => Step::Emit {
                    token: Token::Escaped(c as char),
                    len: 2,
                },
                _ => Step::Advance(1),
            },
            b'?' if self.opts.question_marks => Step::Emit {
                token: Token::Placeholder(PlaceholderToken::Question),
                len: 1,
            },
            b':' => self.step_colon(),
            b'$' => return self.step_dollar(),
            _ => Step::Advance(1),
        };
        Ok(step)
    }

    /// `E'...'` (or `e'...'`) not glued to a preceding identifier.
    fn has_escape_prefix(&self) -> bool {
        let bytes = self.sql.as_bytes();
        match self.pos {
            0 => false,
            1 => matches!(bytes[0], b'E' | b'e'),
            p => matches!(bytes[p - 1], b'E' | b'e') && !is_ident_char(bytes[p - 2]),
        }
    }

    fn is_placeholder_char(&self, c: u8) -> bool {
        match c {
            b'?' => self.opts.question_marks,
            b':' => self.opts.colons,
            b'$' => true,
            _ => false,
        }
    }

    fn step_colon(&self) -> Step<'a> {
        let sql = self.sql;
        let bytes = sql.as_bytes();

        // A run of colons is a cast operator and never a placeholder
        if self.peek(1) == Some(b':') || self.prev() == Some(b':') {
            let run = bytes[self.pos..].iter().take_while(|&&c| c == b':').count();
            return Step::Advance(run);
        }
        if !self.opts.colons {
            return Step::Advance(1);
        }

        match self.peek(1) {
            Some(c) if is_name_char(c) => {
                // Array slice bounds like [1:2]
                if c.is_ascii_digit() && self.prev().is_some_and(|p| p.is_ascii_digit()) {
                    return Step::Advance(1);
                }
                let len = bytes[self.pos + 1..]
                    .iter()
                    .take_while(|&&c| is_name_char(c))
                    .count();
                let name = &sql[self.pos + 1..self.pos + 1 + len];
                Step::Emit {
                    token: Token::Placeholder(PlaceholderToken::Named(name)),
                    len: 1 + len,
                }
            }
            _ => Step::Advance(1),
        }
    }

    fn step_dollar(&self) -> Result<Step<'a>, ParseError> {
        let sql = self.sql;
        let bytes = sql.as_bytes();

        // `$` inside an identifier such as foo$bar
        if self.prev().is_some_and(is_ident_char) {
            return Ok(Step::Advance(1));
        }

        match self.peek(1) {
            Some(first) if first.is_ascii_digit() => {
                let digits = bytes[self.pos + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_digit())
                    .count();
                let text = &sql[self.pos..self.pos + 1 + digits];
                if first == b'0' {
                    return Err(ParseError::InvalidNumber(text.to_string()));
                }
                let number = text[1..]
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n <= MAX_PARAMETERS)
                    .ok_or_else(|| ParseError::InvalidNumber(text.to_string()))?;
                Ok(Step::Emit {
                    token: Token::Placeholder(PlaceholderToken::Numbered(number)),
                    len: 1 + digits,
                })
            }
            next => {
                let tag_len = match next {
                    Some(c) if c.is_ascii_alphabetic() || c == b'_' || c >= 0x80 => {
                        1 + bytes[self.pos + 2..]
                            .iter()
                            .take_while(|&&c| is_ident_char(c))
                            .count()
                    }
                    _ => 0,
                };
                let close = self.pos + 1 + tag_len;
                if bytes.get(close) != Some(&b'$') {
                    return Ok(Step::Advance(1));
                }
                let tag = &sql[self.pos..=close];
                if sql[close + 1..].contains(tag) {
                    Ok(Step::Enter(LexState::DollarQuoted { tag }, tag.len()))
                } else {
                    // No terminator: the dollar sign is ordinary text
                    Ok(Step::Advance(1))
                }
            }
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(token) = self.queued.take() {
            return Some(Ok(token));
        }
        if self.finished {
            return None;
        }

        let sql = self.sql;
        let len = sql.len();
        while self.pos < len {
            match self.step() {
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                Ok(Step::Advance(n)) => self.pos = (self.pos + n).min(len),
                Ok(Step::Enter(state, n)) => {
                    if self.state == LexState::Plain {
                        self.opened_at = self.pos;
                    }
                    self.state = state;
                    self.pos = (self.pos + n).min(len);
                }
                Ok(Step::Emit { token, len: n }) => {
                    let literal = &sql[self.start..self.pos];
                    self.pos += n;
                    self.start = self.pos;
                    if literal.is_empty() {
                        return Some(Ok(token));
                    }
                    self.queued = Some(token);
                    return Some(Ok(Token::Literal(literal)));
                }
            }
        }

        self.finished = true;
        let unterminated = match self.state {
            LexState::SingleQuoted { .. } => Some("quoted string"),
            LexState::DoubleQuoted => Some("quoted identifier"),
            LexState::BlockComment { .. } => Some("block comment"),
            LexState::DollarQuoted { .. } => Some("dollar-quoted string"),
            LexState::Plain | LexState::LineComment => None,
        };
        if let Some(what) = unterminated {
            return Some(Err(ParseError::Unterminated {
                what,
                offset: self.opened_at,
            }));
        }
        if self.start < len {
            let rest = &sql[self.start..];
            self.start = len;
            return Some(Ok(Token::Literal(rest)));
        }
        None
    }
}

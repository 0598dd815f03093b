//! SQL text handling.
//!
//! - `lexer`: quote/comment/dollar-quote aware tokenizer that finds placeholders
//! - `segmenter`: turns the token stream into a reusable `Template`
//! - `cache`: LRU cache of parsed templates keyed by text and options

pub mod cache;
pub mod lexer;
pub mod segmenter;

use std::fmt;

pub use cache::TemplateCache;
pub use segmenter::{segment, PlaceholderId, Segment, SegmenterOptions, Template};

/// The three mutually exclusive placeholder syntaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// `?`
    QuestionMark,
    /// `$1`, `$2`, ...
    Numbered,
    /// `:name`
    Named,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::QuestionMark => write!(f, "'?'"),
            Dialect::Numbered => write!(f, "'$N'"),
            Dialect::Named => write!(f, "':name'"),
        }
    }
}

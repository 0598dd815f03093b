//! Errors raised by the wire layer.

use std::collections::HashMap;
use std::fmt;
use std::io;

use thiserror::Error;

/// Result type for wire-level operations.
pub type PgResult<T> = Result<T, PgError>;

/// Fields of an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    pub severity: String,
    /// Five-character SQL-state; may be empty when synthesized locally.
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ErrorFields {
    pub(crate) fn from_map(fields: &HashMap<u8, String>) -> Self {
        Self {
            severity: fields
                .get(&b'V')
                .or_else(|| fields.get(&b'S'))
                .cloned()
                .unwrap_or_default(),
            code: fields.get(&b'C').cloned().unwrap_or_default(),
            message: fields.get(&b'M').cloned().unwrap_or_default(),
            detail: fields.get(&b'D').cloned(),
            hint: fields.get(&b'H').cloned(),
        }
    }

    /// Error raised locally without a server response.
    pub fn local(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: "ERROR".to_string(),
            code: code.to_string(),
            message: message.into(),
            detail: None,
            hint: None,
        }
    }
}

impl fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)?;
        if let Some(d) = &self.detail {
            write!(f, "\nDetail: {}", d)?;
        }
        if let Some(h) = &self.hint {
            write!(f, "\nHint: {}", h)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum PgError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unexpected message or malformed frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server rejected a startup or control request.
    #[error("{0}")]
    Server(ErrorFields),

    #[error("connection is closed")]
    ConnectionClosed,
}

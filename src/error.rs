//! Error types for the driver core.
//!
//! Parse and bind errors are raised locally before any network traffic.
//! Everything the server reports is carried with its five-character
//! SQL-state so callers can inspect it uniformly.

use thiserror::Error;

use crate::pg::error::PgError;
use crate::sql::Dialect;

/// Well-known SQL-state codes used when the server supplies none.
pub mod sqlstate {
    pub const SUCCESSFUL_COMPLETION: &str = "00000";
    pub const CONNECTION_EXCEPTION: &str = "08000";
    pub const CONNECTION_FAILURE: &str = "08006";
    pub const DATA_EXCEPTION: &str = "22000";
    pub const SYNTAX_ERROR: &str = "42601";
    pub const INVALID_PARAMETER_VALUE: &str = "22023";
    pub const OBJECT_NOT_IN_PREREQUISITE_STATE: &str = "55000";
    pub const QUERY_CANCELED: &str = "57014";
    pub const IN_FAILED_SQL_TRANSACTION: &str = "25P02";
}

/// SQL text could not be split into segments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("cannot mix placeholder styles: found {found} after {active}")]
    MixedDialects { active: Dialect, found: Dialect },

    #[error("unterminated {what} starting at byte {offset}")]
    Unterminated { what: &'static str, offset: usize },

    #[error("invalid numbered placeholder \"{0}\"")]
    InvalidNumber(String),

    #[error("numbered placeholders must run $1..${max} without gaps: ${missing} is missing")]
    NumberGap { missing: usize, max: usize },
}

/// A value could not be attached to a placeholder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("cannot bind a value: statement has no placeholders")]
    NoPlaceholders,

    #[error("cannot bind unknown placeholder {0}")]
    UnknownPlaceholder(String),

    #[error("cannot specify both an SQL type and a PostgreSQL type")]
    ConflictingTypeHints,

    #[error("cannot bind a non-scalar value to placeholder {0}")]
    NonScalar(String),

    #[error("unknown PostgreSQL type oid {0}")]
    UnknownType(i32),

    #[error("execute called with an unbound placeholder {0}")]
    Unbound(String),

    #[error("invalid value for placeholder {placeholder}: {reason}")]
    InvalidValue { placeholder: String, reason: String },
}

/// A cancel request did not cancel anything.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CancelError {
    #[error("no asynchronous query is running")]
    NothingPending,

    #[error("query had already finished; nothing was cancelled")]
    AlreadyFinished,

    #[error("failed to send cancel request: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("bind error: {0}")]
    Bind(#[from] BindError),

    #[error("prepare failed: {message} ({sqlstate})")]
    Prepare { sqlstate: String, message: String },

    #[error("{message} ({sqlstate})")]
    Exec {
        sqlstate: String,
        message: String,
        detail: Option<String>,
    },

    #[error("protocol state error: {0}")]
    ProtocolState(String),

    #[error("copy error: {0}")]
    Copy(String),

    #[error("cancel error: {0}")]
    Cancel(#[from] CancelError),

    #[error(transparent)]
    Backend(#[from] PgError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// The SQL-state for this error, synthesized when the server gave none.
    pub fn sqlstate(&self) -> &str {
        match self {
            DriverError::Parse(_) => sqlstate::SYNTAX_ERROR,
            DriverError::Bind(_) => sqlstate::INVALID_PARAMETER_VALUE,
            DriverError::Prepare { sqlstate: code, .. }
            | DriverError::Exec { sqlstate: code, .. } => code,
            DriverError::ProtocolState(_) | DriverError::Copy(_) => {
                sqlstate::OBJECT_NOT_IN_PREREQUISITE_STATE
            }
            DriverError::Cancel(_) => sqlstate::QUERY_CANCELED,
            DriverError::Backend(PgError::Server(fields)) if !fields.code.is_empty() => {
                &fields.code
            }
            DriverError::Backend(PgError::Io(_)) | DriverError::Backend(PgError::ConnectionClosed) => {
                sqlstate::CONNECTION_FAILURE
            }
            DriverError::Backend(_) => sqlstate::CONNECTION_EXCEPTION,
            DriverError::Config(_) => sqlstate::DATA_EXCEPTION,
        }
    }

    /// True when the underlying transport is gone and the caller must reconnect.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            DriverError::Backend(PgError::Io(_)) | DriverError::Backend(PgError::ConnectionClosed)
        )
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_fallbacks() {
        let err = DriverError::from(ParseError::InvalidNumber("$0".to_string()));
        assert_eq!(err.sqlstate(), "42601");

        let err = DriverError::ProtocolState("copy in progress".to_string());
        assert_eq!(err.sqlstate(), "55000");

        let err = DriverError::Backend(PgError::ConnectionClosed);
        assert_eq!(err.sqlstate(), "08006");
        assert!(err.is_connection_lost());
    }

    #[test]
    fn test_exec_error_display() {
        let err = DriverError::Exec {
            sqlstate: "42P01".to_string(),
            message: "relation \"t\" does not exist".to_string(),
            detail: None,
        };
        assert_eq!(err.to_string(), "relation \"t\" does not exist (42P01)");
        assert_eq!(err.sqlstate(), "42P01");
    }
}

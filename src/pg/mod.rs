//! Backend abstraction and the PostgreSQL wire implementation.
//!
//! The driver core talks to the server only through the `Backend` trait,
//! which mirrors the asynchronous command/result interface of the v3
//! protocol: dispatch a command, then pull results one at a time until
//! `get_result` returns `None`.
//!
//! - `protocol`: low-level message encoding/decoding
//! - `wire`: `WireBackend`, the TCP implementation of `Backend`
//! - `scram`: SCRAM-SHA-256 client for authentication

pub mod error;
pub mod protocol;
pub mod scram;
pub mod wire;


use bytes::Bytes;

pub use error::{ErrorFields, PgError, PgResult};
pub use protocol::{FieldDescription, Format, TransactionStatus};
pub use wire::{PgConfig, WireBackend};

use crate::types::Oid;

/// Status of one command result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    EmptyQuery,
    CommandOk,
    TuplesOk,
    CopyOut,
    CopyIn,
    CopyBoth,
    BadResponse,
    NonfatalError,
    FatalError,
}

impl ExecStatus {
    #[inline]
    pub fn is_copy(self) -> bool {
        matches!(self, ExecStatus::CopyIn | ExecStatus::CopyOut | ExecStatus::CopyBoth)
    }

    #[inline]
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ExecStatus::EmptyQuery
                | ExecStatus::BadResponse
                | ExecStatus::NonfatalError
                | ExecStatus::FatalError
        )
    }
}

/// One command result as received from the backend.
#[derive(Debug, Clone)]
pub struct RawResult {
    pub status: ExecStatus,
    pub fields: Vec<FieldDescription>,
    /// Text-format cells; `None` is SQL NULL.
    pub rows: Vec<Vec<Option<Bytes>>>,
    pub command_tag: String,
    pub error: Option<ErrorFields>,
    /// Parameter types reported for a prepared statement.
    pub param_types: Vec<Oid>,
    pub copy_format: Format,
}

impl RawResult {
    pub fn new(status: ExecStatus) -> Self {
        Self {
            status,
            fields: Vec::new(),
            rows: Vec::new(),
            command_tag: String::new(),
            error: None,
            param_types: Vec::new(),
            copy_format: Format::Text,
        }
    }

    pub fn command(tag: &str) -> Self {
        Self {
            command_tag: tag.to_string(),
            ..Self::new(ExecStatus::CommandOk)
        }
    }

    pub fn tuples(fields: Vec<FieldDescription>, rows: Vec<Vec<Option<Bytes>>>) -> Self {
        let tag = format!("SELECT {}", rows.len());
        Self {
            fields,
            rows,
            command_tag: tag,
            ..Self::new(ExecStatus::TuplesOk)
        }
    }

    pub fn error(fields: ErrorFields) -> Self {
        Self {
            error: Some(fields),
            ..Self::new(ExecStatus::FatalError)
        }
    }

    pub fn copy(status: ExecStatus, format: Format) -> Self {
        Self {
            copy_format: format,
            ..Self::new(status)
        }
    }
}

/// One positional parameter for a parameterized or prepared execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// `None` is SQL NULL.
    pub value: Option<Vec<u8>>,
    pub format: Format,
    /// `Oid::UNSPECIFIED` lets the server infer the type.
    pub type_oid: Oid,
}

impl Param {
    pub fn text(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: Some(value.into()),
            format: Format::Text,
            type_oid: Oid::UNSPECIFIED,
        }
    }

    pub fn null() -> Self {
        Self {
            value: None,
            format: Format::Text,
            type_oid: Oid::UNSPECIFIED,
        }
    }
}

/// Command/result interface to a PostgreSQL server.
///
/// Each `send_*` dispatches one command without waiting. Results are
/// pulled with `get_result` until it yields `None`. While a COPY is in
/// progress `get_result` yields `None` until the copy is ended.
pub trait Backend {
    /// Simple query; the text may hold several statements.
    async fn send_query(&mut self, sql: &str) -> PgResult<()>;

    /// Unnamed parameterized execution of `$N` text.
    async fn send_query_params(&mut self, sql: &str, params: &[Param]) -> PgResult<()>;

    /// Create the named prepared statement `name`; yields one result
    /// carrying the server-inferred parameter types.
    async fn send_prepare(&mut self, name: &str, sql: &str, types: &[Oid]) -> PgResult<()>;

    async fn send_query_prepared(&mut self, name: &str, params: &[Param]) -> PgResult<()>;

    async fn get_result(&mut self) -> PgResult<Option<RawResult>>;

    /// Read whatever input is available without blocking.
    async fn consume_input(&mut self) -> PgResult<()>;

    /// True while `get_result` would have to wait for the server.
    fn is_busy(&self) -> bool;

    async fn put_copy_data(&mut self, data: &[u8]) -> PgResult<()>;

    /// End COPY FROM STDIN; `Some(reason)` aborts it instead.
    async fn put_copy_end(&mut self, error: Option<&str>) -> PgResult<()>;

    /// Next COPY TO STDOUT chunk, `None` once the copy is done.
    async fn get_copy_data(&mut self) -> PgResult<Option<Bytes>>;

    /// Ask the server to cancel the command in progress.
    async fn cancel(&mut self) -> PgResult<()>;

    fn transaction_status(&self) -> TransactionStatus;

    fn parameter_status(&self, name: &str) -> Option<&str>;

    fn backend_pid(&self) -> i32;

    fn is_broken(&self) -> bool;

    async fn close(&mut self) -> PgResult<()>;
}

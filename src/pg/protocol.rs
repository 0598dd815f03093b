//! PostgreSQL v3 wire protocol message encoding and decoding.
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::error::{PgError, PgResult};
use super::Param;
use crate::types::Oid;

// ============================================================================
// Protocol Constants
// ============================================================================

/// PostgreSQL protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 196608; // (3 << 16) | 0

/// Request code of the out-of-band CancelRequest packet.
pub const CANCEL_REQUEST_CODE: i32 = 80877102; // (1234 << 16) | 5678

/// Format codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum Format {
    #[default]
    Text = 0,
    Binary = 1,
}

impl From<i16> for Format {
    fn from(code: i16) -> Self {
        if code == 0 {
            Format::Text
        } else {
            Format::Binary
        }
    }
}

/// Transaction status as last reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not in a transaction block
    Idle,
    /// A command is in flight; the status is not known yet
    Active,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    Failed,
    /// The connection is broken
    Unknown,
}

impl From<u8> for TransactionStatus {
    fn from(b: u8) -> Self {
        match b {
            b'I' => TransactionStatus::Idle,
            b'T' => TransactionStatus::InTransaction,
            b'E' => TransactionStatus::Failed,
            _ => TransactionStatus::Unknown,
        }
    }
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// Trait for encoding frontend messages
pub trait FrontendMessage {
    fn encode(&self) -> BytesMut;
}

/// Build `tag | len | body`; the length covers itself and the body.
fn framed(tag: u8, write_body: impl FnOnce(&mut BytesMut)) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(tag);
    buf.put_i32(0);
    write_body(&mut buf);
    let len = (buf.len() - 1) as i32;
    buf[1..5].copy_from_slice(&len.to_be_bytes());
    buf
}

#[inline]
fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

/// Startup message sent at connection start
#[derive(Debug, Clone)]
pub struct StartupMessage<'a> {
    pub user: &'a str,
    pub database: Option<&'a str>,
    pub options: Vec<(&'a str, &'a str)>,
}

impl FrontendMessage for StartupMessage<'_> {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_i32(0);
        buf.put_i32(PROTOCOL_VERSION);

        put_cstring(&mut buf, "user");
        put_cstring(&mut buf, self.user);
        if let Some(db) = self.database {
            put_cstring(&mut buf, "database");
            put_cstring(&mut buf, db);
        }
        for (key, value) in &self.options {
            put_cstring(&mut buf, key);
            put_cstring(&mut buf, value);
        }
        buf.put_u8(0);

        let len = buf.len() as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());
        buf
    }
}

/// Out-of-band cancel request, sent on a fresh connection.
#[derive(Debug, Clone, Copy)]
pub struct CancelRequestMessage {
    pub process_id: i32,
    pub secret_key: i32,
}

impl FrontendMessage for CancelRequestMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_i32(16);
        buf.put_i32(CANCEL_REQUEST_CODE);
        buf.put_i32(self.process_id);
        buf.put_i32(self.secret_key);
        buf
    }
}

/// Password message (MD5 or cleartext auth)
#[derive(Debug, Clone)]
pub struct PasswordMessage<'a> {
    pub password: &'a str,
}

impl FrontendMessage for PasswordMessage<'_> {
    fn encode(&self) -> BytesMut {
        framed(b'p', |body| put_cstring(body, self.password))
    }
}

/// SASL initial response ('p') carrying the client-first message
#[derive(Debug, Clone)]
pub struct SaslInitialResponseMessage<'a> {
    pub mechanism: &'a str,
    pub data: &'a [u8],
}

impl FrontendMessage for SaslInitialResponseMessage<'_> {
    fn encode(&self) -> BytesMut {
        framed(b'p', |body| {
            put_cstring(body, self.mechanism);
            body.put_i32(self.data.len() as i32);
            body.put_slice(self.data);
        })
    }
}

/// SASL response ('p') carrying the client-final message
#[derive(Debug, Clone)]
pub struct SaslResponseMessage<'a> {
    pub data: &'a [u8],
}

impl FrontendMessage for SaslResponseMessage<'_> {
    fn encode(&self) -> BytesMut {
        framed(b'p', |body| body.put_slice(self.data))
    }
}

/// Simple query ('Q')
#[derive(Debug, Clone)]
pub struct QueryMessage<'a> {
    pub query: &'a str,
}

impl FrontendMessage for QueryMessage<'_> {
    fn encode(&self) -> BytesMut {
        framed(b'Q', |body| put_cstring(body, self.query))
    }
}

/// Parse ('P'): creates a prepared statement; the empty name is the unnamed one
#[derive(Debug, Clone)]
pub struct ParseMessage<'a> {
    pub name: &'a str,
    pub query: &'a str,
    pub param_types: &'a [Oid],
}

impl FrontendMessage for ParseMessage<'_> {
    fn encode(&self) -> BytesMut {
        framed(b'P', |body| {
            put_cstring(body, self.name);
            put_cstring(body, self.query);
            body.put_i16(self.param_types.len() as i16);
            for oid in self.param_types {
                body.put_i32(oid.as_i32());
            }
        })
    }
}

/// Bind ('B'): binds parameter values to a prepared statement.
///
/// Results are always requested in text format.
#[derive(Debug, Clone)]
pub struct BindMessage<'a> {
    pub portal: &'a str,
    pub statement: &'a str,
    pub params: &'a [Param],
}

impl FrontendMessage for BindMessage<'_> {
    fn encode(&self) -> BytesMut {
        framed(b'B', |body| {
            put_cstring(body, self.portal);
            put_cstring(body, self.statement);

            body.put_i16(self.params.len() as i16);
            for param in self.params {
                body.put_i16(param.format as i16);
            }

            body.put_i16(self.params.len() as i16);
            for param in self.params {
                match &param.value {
                    Some(data) => {
                        body.put_i32(data.len() as i32);
                        body.put_slice(data);
                    }
                    None => body.put_i32(-1),
                }
            }

            // Zero result format codes: every column comes back as text
            body.put_i16(0);
        })
    }
}

/// Execute ('E'): runs a bound portal
#[derive(Debug, Clone)]
pub struct ExecuteMessage<'a> {
    pub portal: &'a str,
    /// 0 = no limit
    pub max_rows: i32,
}

impl FrontendMessage for ExecuteMessage<'_> {
    fn encode(&self) -> BytesMut {
        framed(b'E', |body| {
            put_cstring(body, self.portal);
            body.put_i32(self.max_rows);
        })
    }
}

/// Describe ('D') of a statement (`b'S'`) or portal (`b'P'`)
#[derive(Debug, Clone)]
pub struct DescribeMessage<'a> {
    pub kind: u8,
    pub name: &'a str,
}

impl FrontendMessage for DescribeMessage<'_> {
    fn encode(&self) -> BytesMut {
        framed(b'D', |body| {
            body.put_u8(self.kind);
            put_cstring(body, self.name);
        })
    }
}

/// CopyData ('d') chunk sent during COPY FROM STDIN
#[derive(Debug, Clone)]
pub struct CopyDataMessage<'a> {
    pub data: &'a [u8],
}

impl FrontendMessage for CopyDataMessage<'_> {
    fn encode(&self) -> BytesMut {
        framed(b'd', |body| body.put_slice(self.data))
    }
}

/// CopyFail ('f'): aborts COPY FROM STDIN with a reason
#[derive(Debug, Clone)]
pub struct CopyFailMessage<'a> {
    pub reason: &'a str,
}

impl FrontendMessage for CopyFailMessage<'_> {
    fn encode(&self) -> BytesMut {
        framed(b'f', |body| put_cstring(body, self.reason))
    }
}

macro_rules! empty_message {
    ($($name:ident => $tag:expr),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy)]
            pub struct $name;

            impl FrontendMessage for $name {
                fn encode(&self) -> BytesMut {
                    framed($tag, |_| {})
                }
            }
        )*
    };
}

empty_message! {
    SyncMessage => b'S',
    TerminateMessage => b'X',
    CopyDoneMessage => b'c',
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Field description in a RowDescription message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

impl FieldDescription {
    /// A text-format column of the given type, as the server would describe it.
    pub fn text(name: &str, type_oid: Oid) -> Self {
        Self {
            name: name.to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format: Format::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BackendMessage {
    // Authentication
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMD5Password { salt: [u8; 4] },
    AuthenticationSASL { mechanisms: Vec<String> },
    AuthenticationSASLContinue { data: Bytes },
    AuthenticationSASLFinal { data: Bytes },

    // Query responses
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,

    // Extended query protocol
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    ParameterDescription { type_oids: Vec<Oid> },

    // COPY sub-protocol
    CopyInResponse { format: Format },
    CopyOutResponse { format: Format },
    CopyBothResponse { format: Format },
    CopyData { data: Bytes },
    CopyDone,

    // Status
    ReadyForQuery { status: TransactionStatus },
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },

    // Errors and notices
    ErrorResponse { fields: HashMap<u8, String> },
    NoticeResponse { fields: HashMap<u8, String> },
    NotificationResponse { process_id: i32, channel: String, payload: String },
}

/// Length of the complete frame at the start of `buf`, if fully buffered.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 5 {
        return None;
    }
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let total = 1 + len;
    (buf.len() >= total).then_some(total)
}

fn need(body: &Bytes, n: usize, what: &str) -> PgResult<()> {
    if body.remaining() < n {
        return Err(PgError::Protocol(format!("truncated {} message", what)));
    }
    Ok(())
}

impl BackendMessage {
    /// Decode one backend message; `buf` starts with the type byte.
    pub fn decode(buf: &mut Bytes) -> PgResult<Self> {
        if buf.remaining() < 5 {
            return Err(PgError::Protocol("incomplete message header".to_string()));
        }

        let msg_type = buf.get_u8();
        let len = buf.get_i32();
        if len < 4 || buf.remaining() < len as usize - 4 {
            return Err(PgError::Protocol("incomplete message body".to_string()));
        }
        let body = buf.split_to(len as usize - 4);

        match msg_type {
            b'R' => Self::decode_auth(body),
            b'T' => Self::decode_row_description(body),
            b'D' => Self::decode_data_row(body),
            b'C' => Ok(BackendMessage::CommandComplete {
                tag: read_cstring(&mut body.clone())?,
            }),
            b'Z' => {
                need(&body, 1, "ReadyForQuery")?;
                Ok(BackendMessage::ReadyForQuery {
                    status: TransactionStatus::from(body[0]),
                })
            }
            b'E' => Ok(BackendMessage::ErrorResponse {
                fields: read_error_fields(body)?,
            }),
            b'N' => Ok(BackendMessage::NoticeResponse {
                fields: read_error_fields(body)?,
            }),
            b'S' => {
                let mut body = body;
                let name = read_cstring(&mut body)?;
                let value = read_cstring(&mut body)?;
                Ok(BackendMessage::ParameterStatus { name, value })
            }
            b'K' => {
                let mut body = body;
                need(&body, 8, "BackendKeyData")?;
                Ok(BackendMessage::BackendKeyData {
                    process_id: body.get_i32(),
                    secret_key: body.get_i32(),
                })
            }
            b'1' => Ok(BackendMessage::ParseComplete),
            b'2' => Ok(BackendMessage::BindComplete),
            b'3' => Ok(BackendMessage::CloseComplete),
            b'I' => Ok(BackendMessage::EmptyQueryResponse),
            b'n' => Ok(BackendMessage::NoData),
            b's' => Ok(BackendMessage::PortalSuspended),
            b't' => Self::decode_parameter_description(body),
            b'G' => Ok(BackendMessage::CopyInResponse {
                format: copy_format(&body)?,
            }),
            b'H' => Ok(BackendMessage::CopyOutResponse {
                format: copy_format(&body)?,
            }),
            b'W' => Ok(BackendMessage::CopyBothResponse {
                format: copy_format(&body)?,
            }),
            b'd' => Ok(BackendMessage::CopyData { data: body }),
            b'c' => Ok(BackendMessage::CopyDone),
            b'A' => {
                let mut body = body;
                need(&body, 4, "NotificationResponse")?;
                let process_id = body.get_i32();
                let channel = read_cstring(&mut body)?;
                let payload = read_cstring(&mut body)?;
                Ok(BackendMessage::NotificationResponse {
                    process_id,
                    channel,
                    payload,
                })
            }
            _ => Err(PgError::Protocol(format!(
                "unknown message type: {}",
                msg_type as char
            ))),
        }
    }

    fn decode_auth(mut body: Bytes) -> PgResult<Self> {
        need(&body, 4, "Authentication")?;
        let auth_type = body.get_i32();

        match auth_type {
            0 => Ok(BackendMessage::AuthenticationOk),
            3 => Ok(BackendMessage::AuthenticationCleartextPassword),
            5 => {
                need(&body, 4, "AuthenticationMD5Password")?;
                let mut salt = [0u8; 4];
                salt.copy_from_slice(&body[..4]);
                Ok(BackendMessage::AuthenticationMD5Password { salt })
            }
            10 => {
                let mut mechanisms = Vec::new();
                while body.remaining() > 0 {
                    let mech = read_cstring(&mut body)?;
                    if mech.is_empty() {
                        break;
                    }
                    mechanisms.push(mech);
                }
                Ok(BackendMessage::AuthenticationSASL { mechanisms })
            }
            11 => Ok(BackendMessage::AuthenticationSASLContinue { data: body }),
            12 => Ok(BackendMessage::AuthenticationSASLFinal { data: body }),
            _ => Err(PgError::Protocol(format!(
                "unsupported authentication type: {}",
                auth_type
            ))),
        }
    }

    fn decode_row_description(mut body: Bytes) -> PgResult<Self> {
        need(&body, 2, "RowDescription")?;
        let num_fields = body.get_i16().max(0) as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let name = read_cstring(&mut body)?;
            need(&body, 18, "RowDescription")?;
            fields.push(FieldDescription {
                name,
                table_oid: body.get_i32(),
                column_attr: body.get_i16(),
                type_oid: Oid(body.get_i32()),
                type_size: body.get_i16(),
                type_modifier: body.get_i32(),
                format: Format::from(body.get_i16()),
            });
        }

        Ok(BackendMessage::RowDescription { fields })
    }

    fn decode_data_row(mut body: Bytes) -> PgResult<Self> {
        need(&body, 2, "DataRow")?;
        let num_cols = body.get_i16().max(0) as usize;
        let mut values = Vec::with_capacity(num_cols);

        for _ in 0..num_cols {
            need(&body, 4, "DataRow")?;
            let len = body.get_i32();
            if len < 0 {
                values.push(None);
            } else {
                need(&body, len as usize, "DataRow")?;
                values.push(Some(body.split_to(len as usize)));
            }
        }

        Ok(BackendMessage::DataRow { values })
    }

    fn decode_parameter_description(mut body: Bytes) -> PgResult<Self> {
        need(&body, 2, "ParameterDescription")?;
        let num_params = body.get_i16().max(0) as usize;
        need(&body, num_params * 4, "ParameterDescription")?;
        let type_oids = (0..num_params).map(|_| Oid(body.get_i32())).collect();
        Ok(BackendMessage::ParameterDescription { type_oids })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Overall format of a Copy{In,Out,Both}Response.
fn copy_format(body: &Bytes) -> PgResult<Format> {
    need(body, 1, "CopyResponse")?;
    Ok(if body[0] == 0 {
        Format::Text
    } else {
        Format::Binary
    })
}

/// Read a null-terminated string from the buffer.
fn read_cstring(buf: &mut Bytes) -> PgResult<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| PgError::Protocol("missing null terminator in string".to_string()))?;

    let s = std::str::from_utf8(&buf[..end])
        .map(|s| s.to_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(&buf[..end]).into_owned());

    buf.advance(end + 1);
    Ok(s)
}

/// Read error/notice response fields
fn read_error_fields(mut body: Bytes) -> PgResult<HashMap<u8, String>> {
    let mut fields = HashMap::new();

    while body.remaining() > 0 {
        let field_type = body.get_u8();
        if field_type == 0 {
            break;
        }
        let value = read_cstring(&mut body)?;
        fields.insert(field_type, value);
    }

    Ok(fields)
}

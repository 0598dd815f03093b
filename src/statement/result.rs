//! Result classification, column metadata and row decoding.

use std::sync::Arc;

use bytes::Bytes;
use smallvec::SmallVec;

use crate::connection::CopyMode;
use crate::error::{sqlstate, DriverError};
use crate::pg::{ExecStatus, FieldDescription, Format, RawResult};
use crate::types::{self, Oid, TypeContext, TypeInfo};
use crate::value::Value;

/// Description of one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub type_oid: Oid,
    pub type_info: Option<&'static TypeInfo>,
    pub type_modifier: i32,
}

impl Column {
    fn from_field(field: &FieldDescription) -> Self {
        Self {
            name: field.name.clone(),
            type_oid: field.type_oid,
            type_info: types::lookup(field.type_oid),
            type_modifier: field.type_modifier,
        }
    }

    /// PostgreSQL's name for the column type, `unknown` if not in the table.
    pub fn type_name(&self) -> &'static str {
        self.type_info.map_or("unknown", |t| t.name)
    }
}

/// Column list shared by every row of a statement.
pub type SharedColumns = Arc<Vec<Column>>;

pub(crate) fn columns_from(fields: &[FieldDescription]) -> SharedColumns {
    Arc::new(fields.iter().map(Column::from_field).collect())
}

/// A fetched row.
///
/// Values are stored inline for rows of up to 16 columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: SharedColumns,
    values: SmallVec<[Value; 16]>,
}

impl Row {
    pub(crate) fn new(columns: SharedColumns, values: SmallVec<[Value; 16]>) -> Self {
        Self { columns, values }
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| self.values.get(i))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values.into_vec()
    }
}

/// Convert one text-format data row.
pub(crate) fn decode_row(
    cells: &[Option<Bytes>],
    columns: &[Column],
    ctx: &TypeContext,
) -> SmallVec<[Value; 16]> {
    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell {
            None => Value::Null,
            Some(raw) => match columns.get(i).and_then(|c| c.type_info) {
                Some(info) => info.handler().dequote(raw, info, ctx),
                None => types::dequote(Oid::UNSPECIFIED, raw, ctx),
            },
        })
        .collect()
}

/// What a result means for the statement that produced it.
#[derive(Debug)]
pub(crate) enum Outcome {
    Tuples { rows: u64 },
    Command { rows: u64 },
    Copy { mode: CopyMode, format: Format },
    Failed(DriverError),
}

pub(crate) fn classify(raw: &RawResult, broken: bool) -> Outcome {
    match raw.status {
        ExecStatus::TuplesOk => Outcome::Tuples {
            rows: raw.rows.len() as u64,
        },
        ExecStatus::CommandOk => Outcome::Command {
            rows: rows_from_tag(&raw.command_tag),
        },
        ExecStatus::CopyIn => Outcome::Copy {
            mode: CopyMode::In,
            format: raw.copy_format,
        },
        ExecStatus::CopyOut => Outcome::Copy {
            mode: CopyMode::Out,
            format: raw.copy_format,
        },
        ExecStatus::CopyBoth => Outcome::Copy {
            mode: CopyMode::Both,
            format: raw.copy_format,
        },
        ExecStatus::EmptyQuery => Outcome::Failed(DriverError::Exec {
            sqlstate: sqlstate::DATA_EXCEPTION.to_string(),
            message: "empty query".to_string(),
            detail: None,
        }),
        ExecStatus::BadResponse | ExecStatus::NonfatalError | ExecStatus::FatalError => {
            Outcome::Failed(exec_error(raw, broken))
        }
    }
}

fn exec_error(raw: &RawResult, broken: bool) -> DriverError {
    let fallback = if broken {
        sqlstate::CONNECTION_EXCEPTION
    } else {
        sqlstate::DATA_EXCEPTION
    };
    match &raw.error {
        Some(fields) => DriverError::Exec {
            sqlstate: if fields.code.is_empty() {
                fallback.to_string()
            } else {
                fields.code.clone()
            },
            message: fields.message.clone(),
            detail: fields.detail.clone(),
        },
        None => DriverError::Exec {
            sqlstate: fallback.to_string(),
            message: format!("server returned {:?}", raw.status),
            detail: None,
        },
    }
}

/// Affected-row count carried by a command tag.
///
/// `INSERT oid n` reports its last word; `DELETE`, `UPDATE`, `SELECT`,
/// `MOVE`, `FETCH`, `COPY` and `MERGE` report `n`. Anything else is 0.
pub fn rows_from_tag(tag: &str) -> u64 {
    let mut words = tag.split_ascii_whitespace();
    let Some(verb) = words.next() else {
        return 0;
    };
    let count = match verb {
        "INSERT" => words.nth(1),
        "DELETE" | "UPDATE" | "SELECT" | "MOVE" | "FETCH" | "COPY" | "MERGE" => words.next(),
        _ => None,
    };
    count.and_then(|n| n.parse().ok()).unwrap_or(0)
}

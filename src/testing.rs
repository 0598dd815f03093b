//! Scripted in-memory backend for driving connections in tests.
//!
//! Every call is recorded. Statement dispatches consume scripted replies in
//! order; control commands (BEGIN, COMMIT, SAVEPOINT, DEALLOCATE...) are
//! answered automatically and move the transaction status the way a
//! server would.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use crate::pg::{
    Backend, ErrorFields, ExecStatus, FieldDescription, Format, Param, PgError, PgResult,
    RawResult, TransactionStatus,
};
use crate::types::Oid;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Query(String),
    QueryParams { sql: String, params: Vec<Param> },
    Prepare { name: String, sql: String, types: Vec<Oid> },
    QueryPrepared { name: String, params: Vec<Param> },
    CopyData(Vec<u8>),
    CopyEnd(Option<String>),
    Cancel,
}

pub struct MockBackend {
    pub calls: Vec<Call>,
    replies: VecDeque<Vec<RawResult>>,
    pending: VecDeque<RawResult>,
    /// Results released once the current copy ends.
    after_copy: VecDeque<RawResult>,
    copy: Option<ExecStatus>,
    copy_out: VecDeque<Bytes>,
    copied_chunks: u64,
    status: TransactionStatus,
    parameters: HashMap<String, String>,
    /// Next prepare fails with this error.
    pub prepare_error: Option<ErrorFields>,
    /// Next DEALLOCATE fails with this error.
    pub deallocate_error: Option<ErrorFields>,
    /// Whether a cancel request reaches the query before it finishes.
    pub cancel_effective: bool,
    /// Polls that still report busy after a dispatch.
    pub busy_polls: usize,
    polls: usize,
    pub broken: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        let mut parameters = HashMap::new();
        parameters.insert("standard_conforming_strings".to_string(), "on".to_string());
        Self {
            calls: Vec::new(),
            replies: VecDeque::new(),
            pending: VecDeque::new(),
            after_copy: VecDeque::new(),
            copy: None,
            copy_out: VecDeque::new(),
            copied_chunks: 0,
            status: TransactionStatus::Idle,
            parameters,
            prepare_error: None,
            deallocate_error: None,
            cancel_effective: true,
            busy_polls: 0,
            polls: 0,
            broken: false,
        }
    }

    /// Queue the results of the next statement dispatch.
    pub fn reply(&mut self, results: Vec<RawResult>) -> &mut Self {
        self.replies.push_back(results);
        self
    }

    /// Queue a single-result reply.
    pub fn reply_one(&mut self, result: RawResult) -> &mut Self {
        self.reply(vec![result])
    }

    /// Data served by the next COPY TO STDOUT.
    pub fn copy_out_data(&mut self, chunks: &[&'static [u8]]) -> &mut Self {
        self.copy_out
            .extend(chunks.iter().map(|c| Bytes::from_static(c)));
        self
    }

    pub fn set_status(&mut self, status: TransactionStatus) {
        self.status = status;
    }

    pub fn set_parameter(&mut self, name: &str, value: &str) {
        self.parameters.insert(name.to_string(), value.to_string());
    }

    /// Every simple query sent, in order.
    pub fn queries(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Query(sql) => Some(sql.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn prepares(&self) -> usize {
        self.count(|c| matches!(c, Call::Prepare { .. }))
    }

    pub fn deallocates(&self) -> usize {
        self.count(|c| matches!(c, Call::Query(sql) if sql.starts_with("DEALLOCATE")))
    }

    fn check_open(&self) -> PgResult<()> {
        if self.broken {
            Err(PgError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn fail(&mut self, fields: ErrorFields) -> RawResult {
        if self.status == TransactionStatus::InTransaction {
            self.status = TransactionStatus::Failed;
        }
        RawResult::error(fields)
    }

    fn aborted(&mut self) -> RawResult {
        self.fail(ErrorFields::local(
            "25P02",
            "current transaction is aborted, commands ignored until end of transaction block",
        ))
    }

    /// Answer a driver-issued command; `None` if `sql` is not one.
    fn control(&mut self, sql: &str) -> Option<RawResult> {
        let upper = sql.to_ascii_uppercase();
        let failed = self.status == TransactionStatus::Failed;
        let result = if upper == "BEGIN" {
            self.status = TransactionStatus::InTransaction;
            RawResult::command("BEGIN")
        } else if upper == "COMMIT" {
            self.status = TransactionStatus::Idle;
            RawResult::command(if failed { "ROLLBACK" } else { "COMMIT" })
        } else if upper == "ROLLBACK" {
            self.status = TransactionStatus::Idle;
            RawResult::command("ROLLBACK")
        } else if upper.starts_with("ROLLBACK TO SAVEPOINT") {
            self.status = TransactionStatus::InTransaction;
            RawResult::command("ROLLBACK")
        } else if upper.starts_with("SAVEPOINT")
            || upper.starts_with("RELEASE")
            || upper.starts_with("SET ")
        {
            if failed {
                return Some(self.aborted());
            }
            RawResult::command(upper.split(' ').next().unwrap_or(""))
        } else if upper.starts_with("DEALLOCATE") {
            if failed {
                return Some(self.aborted());
            }
            match self.deallocate_error.take() {
                Some(fields) => self.fail(fields),
                None => RawResult::command("DEALLOCATE"),
            }
        } else {
            return None;
        };
        Some(result)
    }

    fn dispatch(&mut self) {
        self.polls = 0;
        if self.status == TransactionStatus::Failed {
            let aborted = self.aborted();
            self.pending.push_back(aborted);
            return;
        }
        let results = self
            .replies
            .pop_front()
            .unwrap_or_else(|| vec![RawResult::command("SELECT 0")]);
        let mut results = results.into_iter();
        for result in results.by_ref() {
            if result.status.is_error() && self.status == TransactionStatus::InTransaction {
                self.status = TransactionStatus::Failed;
            }
            let is_copy = result.status.is_copy();
            self.pending.push_back(result);
            if is_copy {
                break;
            }
        }
        self.after_copy.extend(results);
    }

    fn end_copy(&mut self, rows: u64) {
        self.copy = None;
        if self.after_copy.is_empty() {
            self.pending.push_back(RawResult::command(&format!("COPY {}", rows)));
        } else {
            self.pending.extend(self.after_copy.drain(..));
        }
    }
}

impl Backend for MockBackend {
    async fn send_query(&mut self, sql: &str) -> PgResult<()> {
        self.check_open()?;
        self.calls.push(Call::Query(sql.to_string()));
        match self.control(sql) {
            Some(result) => self.pending.push_back(result),
            None => self.dispatch(),
        }
        Ok(())
    }

    async fn send_query_params(&mut self, sql: &str, params: &[Param]) -> PgResult<()> {
        self.check_open()?;
        self.calls.push(Call::QueryParams {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.dispatch();
        Ok(())
    }

    async fn send_prepare(&mut self, name: &str, sql: &str, types: &[Oid]) -> PgResult<()> {
        self.check_open()?;
        self.calls.push(Call::Prepare {
            name: name.to_string(),
            sql: sql.to_string(),
            types: types.to_vec(),
        });
        let result = match self.prepare_error.take() {
            Some(fields) => self.fail(fields),
            None if self.status == TransactionStatus::Failed => self.aborted(),
            None => RawResult {
                param_types: types.to_vec(),
                ..RawResult::new(ExecStatus::CommandOk)
            },
        };
        self.pending.push_back(result);
        Ok(())
    }

    async fn send_query_prepared(&mut self, name: &str, params: &[Param]) -> PgResult<()> {
        self.check_open()?;
        self.calls.push(Call::QueryPrepared {
            name: name.to_string(),
            params: params.to_vec(),
        });
        self.dispatch();
        Ok(())
    }

    async fn get_result(&mut self) -> PgResult<Option<RawResult>> {
        self.check_open()?;
        if self.copy.is_some() {
            return Ok(None);
        }
        let next = self.pending.pop_front();
        if let Some(result) = &next {
            if result.status.is_copy() {
                self.copy = Some(result.status);
                self.copied_chunks = 0;
            }
        }
        Ok(next)
    }

    async fn consume_input(&mut self) -> PgResult<()> {
        self.check_open()?;
        self.polls += 1;
        Ok(())
    }

    fn is_busy(&self) -> bool {
        !self.pending.is_empty() && self.polls <= self.busy_polls
    }

    async fn put_copy_data(&mut self, data: &[u8]) -> PgResult<()> {
        self.check_open()?;
        if !matches!(self.copy, Some(ExecStatus::CopyIn | ExecStatus::CopyBoth)) {
            return Err(PgError::Protocol("not in COPY IN".to_string()));
        }
        self.calls.push(Call::CopyData(data.to_vec()));
        self.copied_chunks += 1;
        Ok(())
    }

    async fn put_copy_end(&mut self, error: Option<&str>) -> PgResult<()> {
        self.check_open()?;
        self.calls.push(Call::CopyEnd(error.map(str::to_string)));
        match error {
            Some(reason) => {
                self.copy = None;
                self.after_copy.clear();
                let failed = self.fail(ErrorFields::local(
                    "57014",
                    format!("COPY from stdin failed: {}", reason),
                ));
                self.pending.push_back(failed);
            }
            None => self.end_copy(self.copied_chunks),
        }
        Ok(())
    }

    async fn get_copy_data(&mut self) -> PgResult<Option<Bytes>> {
        self.check_open()?;
        if !matches!(self.copy, Some(ExecStatus::CopyOut | ExecStatus::CopyBoth)) {
            return Err(PgError::Protocol("not in COPY OUT".to_string()));
        }
        match self.copy_out.pop_front() {
            Some(chunk) => {
                self.copied_chunks += 1;
                Ok(Some(chunk))
            }
            None => {
                self.end_copy(self.copied_chunks);
                Ok(None)
            }
        }
    }

    async fn cancel(&mut self) -> PgResult<()> {
        self.check_open()?;
        self.calls.push(Call::Cancel);
        if self.cancel_effective && !self.pending.is_empty() {
            self.pending.clear();
            self.after_copy.clear();
            let cancelled = self.fail(ErrorFields::local(
                "57014",
                "canceling statement due to user request",
            ));
            self.pending.push_back(cancelled);
        }
        Ok(())
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.status
    }

    fn parameter_status(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    fn backend_pid(&self) -> i32 {
        4242
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn close(&mut self) -> PgResult<()> {
        Ok(())
    }
}

// ============================================================================
// Result builders
// ============================================================================

/// A TuplesOk result with text columns of the given types.
pub fn tuples(columns: &[(&str, Oid)], rows: &[&[Option<&str>]]) -> RawResult {
    let fields = columns
        .iter()
        .map(|(name, oid)| FieldDescription::text(name, *oid))
        .collect();
    let rows = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| cell.map(|s| Bytes::copy_from_slice(s.as_bytes())))
                .collect()
        })
        .collect();
    RawResult::tuples(fields, rows)
}

pub fn error(code: &str, message: &str) -> RawResult {
    RawResult::error(ErrorFields::local(code, message))
}

pub fn copy_in() -> RawResult {
    RawResult::copy(ExecStatus::CopyIn, Format::Text)
}

pub fn copy_out(format: Format) -> RawResult {
    RawResult::copy(ExecStatus::CopyOut, format)
}

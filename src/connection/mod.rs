//! Connection state shared by every statement.
//!
//! The connection owns the backend plus four pieces of bookkeeping:
//! - the result slot (last result, tagged with the statement that owns it)
//! - the async state (at most one asynchronous query in flight)
//! - the copy state (a COPY blocks every other command)
//! - the savepoint stack and last-error fields
//!
//! Every operation takes `&mut self`, so one connection is never used by
//! two callers at once.

mod async_query;
mod copy;
mod transaction;

use std::sync::Arc;

use log::{debug, trace};

pub use async_query::{AsyncPoll, AsyncStatus};
pub(crate) use async_query::AsyncState;
pub use copy::{CopyChunk, CopyMode};
pub(crate) use copy::CopyState;

use crate::config::{DriverOptions, StatementOptions};
use crate::error::{DriverError, Result};
use crate::pg::{Backend, RawResult, TransactionStatus, WireBackend};
use crate::sql::{segment, SegmenterOptions, Template, TemplateCache};
use crate::statement::result::{classify, Outcome};
use crate::statement::{Statement, StatementId};
use crate::types::TypeContext;

/// SQL-state and message of the most recent failure on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub sqlstate: String,
    pub message: String,
}

/// Who the result in the slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOwner {
    Unowned,
    Statement(StatementId),
}

/// The connection's current result.
///
/// Statements keep their own `Arc` to the results they adopted, so
/// replacing the slot never frees a result a statement still reads from.
/// Only the outcome of an asynchronous query arrives before its statement
/// has adopted it; such a result is parked when overwritten and stays
/// parked until its statement collects or releases it.
#[derive(Debug, Default)]
pub(crate) struct ResultSlot {
    current: Option<Slotted>,
    parked: Vec<(StatementId, Arc<RawResult>)>,
}

#[derive(Debug)]
struct Slotted {
    owner: SlotOwner,
    result: Arc<RawResult>,
    awaiting_adoption: bool,
}

impl ResultSlot {
    /// Store a result its statement has already taken in hand.
    pub fn store(&mut self, owner: SlotOwner, result: Arc<RawResult>) {
        self.put(owner, result, false);
    }

    /// Store the outcome of an asynchronous query for its issuer to collect.
    pub fn store_unadopted(&mut self, issuer: StatementId, result: Arc<RawResult>) {
        self.put(SlotOwner::Statement(issuer), result, true);
    }

    fn put(&mut self, owner: SlotOwner, result: Arc<RawResult>, awaiting_adoption: bool) {
        if let Some(prev) = self.current.take() {
            if let SlotOwner::Statement(id) = prev.owner {
                if prev.awaiting_adoption && prev.owner != owner {
                    self.parked.retain(|(parked, _)| *parked != id);
                    self.parked.push((id, prev.result));
                }
            }
        }
        self.current = Some(Slotted {
            owner,
            result,
            awaiting_adoption,
        });
    }

    /// The result waiting for `id`, if any.
    pub fn take_for(&mut self, id: StatementId) -> Option<Arc<RawResult>> {
        if let Some(slotted) = self
            .current
            .as_mut()
            .filter(|s| s.owner == SlotOwner::Statement(id))
        {
            slotted.awaiting_adoption = false;
            return Some(Arc::clone(&slotted.result));
        }
        let index = self.parked.iter().position(|(owner, _)| *owner == id)?;
        Some(self.parked.swap_remove(index).1)
    }

    pub fn release(&mut self, id: StatementId) {
        if self
            .current
            .as_ref()
            .is_some_and(|s| s.owner == SlotOwner::Statement(id))
        {
            self.current = None;
        }
        self.parked.retain(|(owner, _)| *owner != id);
    }

    pub fn owner(&self) -> Option<SlotOwner> {
        self.current.as_ref().map(|s| s.owner)
    }

    #[cfg(test)]
    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }
}

/// A database connection: a backend plus the driver's per-connection state.
pub struct Connection<B: Backend> {
    pub(crate) backend: B,
    pub(crate) options: DriverOptions,
    pub(crate) slot: ResultSlot,
    pub(crate) async_state: AsyncState,
    pub(crate) copy: CopyState,
    pub(crate) savepoints: Vec<String>,
    last_error: Option<LastError>,
    next_statement_id: u64,
    templates: TemplateCache,
}

impl Connection<WireBackend> {
    /// Connect over TCP with default options.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, DriverOptions::default()).await
    }

    pub async fn connect_with(url: &str, options: DriverOptions) -> Result<Self> {
        let backend = WireBackend::connect(url).await?;
        Ok(Self::new(backend, options))
    }
}

impl<B: Backend> Connection<B> {
    pub fn new(backend: B, options: DriverOptions) -> Self {
        let templates = TemplateCache::new(options.template_cache_capacity);
        Self {
            backend,
            options,
            slot: ResultSlot::default(),
            async_state: AsyncState::default(),
            copy: CopyState::default(),
            savepoints: Vec::new(),
            last_error: None,
            next_statement_id: 0,
            templates,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.backend.transaction_status()
    }

    /// Hits and misses of the `prepare_cached` template cache.
    pub fn template_cache_stats(&self) -> (u64, u64) {
        self.templates.stats()
    }

    /// Owner of the result currently held by the connection.
    pub fn result_owner(&self) -> Option<SlotOwner> {
        self.slot.owner()
    }

    /// Whether string literals treat backslashes literally.
    pub fn standard_strings(&self) -> bool {
        self.backend
            .parameter_status("standard_conforming_strings")
            .map_or(true, |v| !v.eq_ignore_ascii_case("off"))
    }

    pub(crate) fn type_context(&self) -> TypeContext {
        TypeContext {
            standard_strings: self.standard_strings(),
            bool_as_text: self.options.bool_as_text,
            chop_blanks: self.options.chop_blanks,
            expand_array: self.options.expand_array,
        }
    }

    pub(crate) fn record_error(&mut self, err: &DriverError) {
        let message = match err {
            DriverError::Exec { message, .. } | DriverError::Prepare { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        };
        self.last_error = Some(LastError {
            sqlstate: err.sqlstate().to_string(),
            message,
        });
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Parse `sql` into a new statement.
    pub fn prepare(&mut self, sql: &str, opts: StatementOptions) -> Result<Statement> {
        let template = Arc::new(segment(sql, &self.segmenter_options(&opts))?);
        Ok(self.new_statement(template, &opts))
    }

    /// Like `prepare`, reusing a parsed template for text seen before.
    pub fn prepare_cached(&mut self, sql: &str, opts: StatementOptions) -> Result<Statement> {
        let seg = self.segmenter_options(&opts);
        let template = self.templates.get_or_parse(sql, &seg)?;
        Ok(self.new_statement(template, &opts))
    }

    /// Run `sql` as-is through the simple-query path; returns the row count.
    pub async fn run(&mut self, sql: &str) -> Result<Option<u64>> {
        let mut stmt = self.prepare(sql, StatementOptions::default().direct(true))?;
        let outcome = stmt.execute(self).await;
        stmt.close(self).await?;
        outcome
    }

    fn segmenter_options(&self, opts: &StatementOptions) -> SegmenterOptions {
        SegmenterOptions {
            dollar_only: opts.dollar_only.unwrap_or(self.options.dollar_only),
            no_colons: opts.no_colons.unwrap_or(self.options.no_colons),
            escape_placeholders: self.options.escape_placeholders,
            standard_conforming_strings: self.standard_strings(),
            direct: opts.direct,
        }
    }

    fn new_statement(&mut self, template: Arc<Template>, opts: &StatementOptions) -> Statement {
        self.next_statement_id += 1;
        Statement::new(
            StatementId(self.next_statement_id),
            template,
            opts.server_prepare.unwrap_or(self.options.server_prepare),
            opts.switch_prepared.unwrap_or(self.options.switch_prepared),
            opts.old_query,
        )
    }

    // ========================================================================
    // Result plumbing
    // ========================================================================

    /// Pull results until the backend has none left. The first error wins;
    /// otherwise the last result is returned.
    pub(crate) async fn drain_results(&mut self) -> Result<Option<RawResult>> {
        let mut last: Option<RawResult> = None;
        while let Some(raw) = self.backend.get_result().await? {
            trace!("result {:?} {:?}", raw.status, raw.command_tag);
            if last.as_ref().map_or(true, |l| !l.status.is_error()) {
                last = Some(raw);
            }
        }
        Ok(last)
    }

    /// Run a driver-issued command (BEGIN, SAVEPOINT, DEALLOCATE...).
    /// Its result never touches the slot.
    pub(crate) async fn run_control(&mut self, sql: &str) -> Result<()> {
        if self.copy.mode != CopyMode::None {
            return Err(DriverError::ProtocolState(format!(
                "cannot run {} while a COPY is in progress",
                sql
            )));
        }
        if self.async_state.is_pending() {
            return Err(DriverError::ProtocolState(format!(
                "cannot run {} while an asynchronous query is running",
                sql
            )));
        }
        debug!("{}", sql);
        self.backend.send_query(sql).await?;
        let raw = self.drain_results().await?;
        match raw.map(|r| classify(&r, self.backend.is_broken())) {
            Some(Outcome::Failed(err)) => {
                self.record_error(&err);
                Err(err)
            }
            _ => Ok(()),
        }
    }

    /// Close the connection, cancelling any asynchronous query first.
    pub async fn close(mut self) -> Result<()> {
        if self.async_state.is_pending() {
            let _ = self.cancel_async().await;
        }
        self.backend.close().await?;
        Ok(())
    }
}

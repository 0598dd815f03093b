//! Statements: bind, plan, execute and fetch.
//!
//! - `placeholder`: the per-statement placeholder registry
//! - `planner`: literal / unnamed / named strategy choice
//! - `prepared`: server-side prepared statement lifecycle
//! - `result`: result classification, columns and rows
//!
//! A `Statement` is independent of its connection's lifetime; every
//! operation that talks to the server takes the connection explicitly.

pub mod placeholder;
pub mod planner;
pub mod prepared;
pub mod result;

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::config::OldQueryPolicy;
use crate::connection::{AsyncStatus, Connection, CopyMode, LastError, SlotOwner};
use crate::error::{BindError, CancelError, DriverError, Result};
use crate::pg::{Backend, RawResult, TransactionStatus};
use crate::sql::Template;
use crate::value::{BindValue, Value};

pub use placeholder::{BindType, PlaceholderKey, PlaceholderRegistry};
pub use planner::{plan, PlanInput, Strategy};
use prepared::PreparedName;
pub use result::{rows_from_tag, Column, Row, SharedColumns};
use result::{classify, columns_from, decode_row, Outcome};

/// Identity of a statement within its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub(crate) u64);

/// Where a statement is in its execute/fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    Executing,
    ResultReady,
    Errored,
    InCopy,
}

/// A prepared SQL statement and its bound values.
#[derive(Debug)]
pub struct Statement {
    id: StatementId,
    template: Arc<Template>,
    numbered: String,
    registry: PlaceholderRegistry,
    server_prepare: bool,
    switch_prepared: u32,
    old_query: Option<OldQueryPolicy>,
    iteration: u32,
    state: ExecState,
    prepared: Option<PreparedName>,
    prepare_failed: bool,
    prepare_error: Option<LastError>,
    needs_reprepare: bool,
    last_strategy: Option<Strategy>,
    result: Option<Arc<RawResult>>,
    columns: Option<SharedColumns>,
    cursor: usize,
    row_count: Option<u64>,
    executed: bool,
    async_status: AsyncStatus,
}

impl Statement {
    pub(crate) fn new(
        id: StatementId,
        template: Arc<Template>,
        server_prepare: bool,
        switch_prepared: u32,
        old_query: Option<OldQueryPolicy>,
    ) -> Self {
        Self {
            id,
            numbered: template.numbered_sql(),
            registry: PlaceholderRegistry::new(&template),
            template,
            server_prepare,
            switch_prepared,
            old_query,
            iteration: 0,
            state: ExecState::Idle,
            prepared: None,
            prepare_failed: false,
            prepare_error: None,
            needs_reprepare: false,
            last_strategy: None,
            result: None,
            columns: None,
            cursor: 0,
            row_count: None,
            executed: false,
            async_status: AsyncStatus::Idle,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn sql(&self) -> &str {
        self.template.sql()
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// The text sent to the server for parameterized execution.
    pub fn numbered_sql(&self) -> &str {
        &self.numbered
    }

    #[inline]
    pub fn state(&self) -> ExecState {
        self.state
    }

    /// Strategy used by the most recent execution.
    pub fn strategy(&self) -> Option<Strategy> {
        self.last_strategy
    }

    /// Number of `execute` calls so far.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn placeholder_count(&self) -> usize {
        self.registry.len()
    }

    pub fn prepared_name(&self) -> Option<&str> {
        self.prepared.as_ref().map(|p| p.name.as_str())
    }

    /// Why the last server-side prepare failed, if it did.
    pub fn prepare_error(&self) -> Option<&LastError> {
        self.prepare_error.as_ref()
    }

    /// Rows returned or affected by the last execution; `None` when
    /// unknown (not executed yet, or a COPY still running).
    pub fn rows_affected(&self) -> Option<u64> {
        self.row_count
    }

    /// State of this statement's most recent asynchronous execution.
    pub fn async_status(&self) -> AsyncStatus {
        self.async_status
    }

    pub fn columns(&self) -> &[Column] {
        self.columns.as_deref().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns().iter().map(|c| c.name.as_str()).collect()
    }

    // ========================================================================
    // Binding
    // ========================================================================

    pub fn bind(
        &mut self,
        key: impl Into<PlaceholderKey>,
        value: impl Into<BindValue>,
    ) -> Result<()> {
        self.bind_with(key, value, BindType::default())
    }

    /// Bind with an explicit SQL-level or native type.
    pub fn bind_with(
        &mut self,
        key: impl Into<PlaceholderKey>,
        value: impl Into<BindValue>,
        hint: BindType,
    ) -> Result<()> {
        let key = key.into();
        let changed = self.registry.bind(&key, value.into(), hint)?;
        if changed && self.prepared.is_some() {
            debug!("type of {} changed; statement will be re-prepared", key);
            self.needs_reprepare = true;
        }
        Ok(())
    }

    pub fn mark_inout(&mut self, key: impl Into<PlaceholderKey>) -> Result<()> {
        self.registry.mark_inout(&key.into())?;
        Ok(())
    }

    /// The value bound to `key`, updated from fetched rows for inout placeholders.
    pub fn bound_value(&self, key: impl Into<PlaceholderKey>) -> Result<Option<&Value>> {
        Ok(self.registry.value(&key.into())?)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute and wait for the result. Returns the row count, or `None`
    /// when the statement started a COPY.
    pub async fn execute<B: Backend>(&mut self, conn: &mut Connection<B>) -> Result<Option<u64>> {
        let outcome = self.execute_and_read(conn).await;
        if let Err(e) = &outcome {
            conn.record_error(e);
        }
        outcome
    }

    /// Bind `values` to placeholders 1..n, then execute.
    pub async fn execute_with<B, I>(
        &mut self,
        conn: &mut Connection<B>,
        values: I,
    ) -> Result<Option<u64>>
    where
        B: Backend,
        I: IntoIterator,
        I::Item: Into<BindValue>,
    {
        let values: Vec<BindValue> = values.into_iter().map(Into::into).collect();
        if values.len() > self.registry.len() {
            return Err(BindError::UnknownPlaceholder(format!("${}", self.registry.len() + 1)).into());
        }
        for (i, value) in values.into_iter().enumerate() {
            self.bind(PlaceholderKey::Ordinal(i + 1), value)?;
        }
        self.execute(conn).await
    }

    /// Dispatch without waiting. Results are collected by
    /// `Connection::wait_async` or the next `fetch`.
    pub async fn execute_async<B: Backend>(&mut self, conn: &mut Connection<B>) -> Result<()> {
        if let Err(e) = self.start(conn).await {
            conn.record_error(&e);
            return Err(e);
        }
        conn.async_state.begin(self.id);
        self.async_status = AsyncStatus::Pending;
        Ok(())
    }

    /// Cancel this statement's asynchronous execution.
    ///
    /// Fails with `CancelError::NothingPending` when another statement
    /// issued the running query.
    pub async fn cancel<B: Backend>(&mut self, conn: &mut Connection<B>) -> Result<()> {
        if self.async_status != AsyncStatus::Pending
            || !conn.async_state.is_pending()
            || conn.async_state.issuer() != Some(self.id)
        {
            return Err(CancelError::NothingPending.into());
        }
        // On AlreadyFinished the result stays in the slot and fetch adopts it
        conn.cancel_async().await?;
        self.async_status = AsyncStatus::Cancelled;
        self.state = ExecState::Idle;
        Ok(())
    }

    async fn execute_and_read<B: Backend>(
        &mut self,
        conn: &mut Connection<B>,
    ) -> Result<Option<u64>> {
        self.start(conn).await?;
        match conn.drain_results().await {
            Ok(raw) => self.absorb(conn, raw),
            Err(e) => {
                self.state = ExecState::Errored;
                Err(e)
            }
        }
    }

    /// Everything up to and including the dispatch.
    async fn start<B: Backend>(&mut self, conn: &mut Connection<B>) -> Result<()> {
        self.preflight(conn).await?;
        self.registry.check_bound()?;
        self.result = None;
        self.cursor = 0;
        self.row_count = None;
        self.state = ExecState::Idle;

        if self.needs_reprepare {
            self.invalidate_and_reprepare(conn).await?;
        }

        self.iteration = self.iteration.saturating_add(1);
        let mut strategy = plan(&self.plan_input());
        conn.ensure_transaction().await?;
        self.state = ExecState::Executing;

        if strategy == Strategy::Named {
            match self.ensure_prepared(conn).await {
                Ok(()) => {}
                Err(DriverError::Prepare { sqlstate, message })
                    if conn.backend.transaction_status() == TransactionStatus::Failed =>
                {
                    self.state = ExecState::Errored;
                    return Err(DriverError::Exec {
                        sqlstate,
                        message,
                        detail: None,
                    });
                }
                Err(err @ DriverError::Prepare { .. }) => {
                    warn!("server-side prepare failed, executing unnamed: {}", err);
                    conn.record_error(&err);
                    strategy = Strategy::Unnamed;
                }
                Err(err) => {
                    self.state = ExecState::Errored;
                    return Err(err);
                }
            }
        }
        debug!("execution {} uses the {} strategy", self.iteration, strategy);
        self.last_strategy = Some(strategy);

        if let Err(e) = self.dispatch(conn, strategy).await {
            self.state = ExecState::Errored;
            return Err(e);
        }
        self.executed = true;
        Ok(())
    }

    /// Refuse during COPY; resolve a pending async query by policy.
    async fn preflight<B: Backend>(&mut self, conn: &mut Connection<B>) -> Result<()> {
        self.sync_copy(conn);
        if conn.copy.mode != CopyMode::None {
            return Err(DriverError::ProtocolState(
                "a COPY is in progress; end it before executing".to_string(),
            ));
        }
        if !conn.async_state.is_pending() {
            return Ok(());
        }
        match self.old_query {
            Some(OldQueryPolicy::Wait) => match conn.wait_async().await {
                Err(e @ (DriverError::Copy(_) | DriverError::Backend(_))) => return Err(e),
                // The old query's own failure belongs to its statement
                _ => {}
            },
            Some(OldQueryPolicy::Cancel) => match conn.cancel_async().await {
                Ok(()) | Err(DriverError::Cancel(CancelError::AlreadyFinished)) => {}
                Err(e) => return Err(e),
            },
            None => {
                return Err(DriverError::ProtocolState(
                    "an asynchronous query is still running; wait for it or cancel it first"
                        .to_string(),
                ))
            }
        }
        // Our own pending result was just resolved; drop it before re-running
        if self.async_status == AsyncStatus::Pending {
            self.async_status = self.resolved_async_status(conn);
            conn.slot.release(self.id);
        }
        Ok(())
    }

    fn plan_input(&self) -> PlanInput {
        PlanInput {
            is_dml: self.template.is_dml(),
            direct: self.template.is_direct(),
            has_default: self.registry.has_default(),
            has_current: self.registry.has_current(),
            placeholder_count: self.registry.len(),
            server_prepare: self.server_prepare,
            switch_prepared: self.switch_prepared,
            iteration: self.iteration,
            prepare_failed: self.prepare_failed,
        }
    }

    async fn dispatch<B: Backend>(
        &mut self,
        conn: &mut Connection<B>,
        strategy: Strategy,
    ) -> Result<()> {
        match strategy {
            Strategy::Literal => {
                let sql = if self.template.is_direct() {
                    self.template.sql().to_string()
                } else {
                    let literals = self.registry.literals(&conn.type_context())?;
                    self.template.substitute(&literals)
                };
                trace!("simple query: {}", sql);
                conn.backend.send_query(&sql).await?;
            }
            Strategy::Unnamed => {
                conn.backend
                    .send_query_params(&self.numbered, &self.registry.params())
                    .await?;
            }
            Strategy::Named => {
                let name = self.prepared.as_ref().map(|p| p.name.as_str()).ok_or_else(|| {
                    DriverError::ProtocolState("statement is not prepared".to_string())
                })?;
                conn.backend
                    .send_query_prepared(name, &self.registry.params())
                    .await?;
            }
        }
        Ok(())
    }

    /// Store the final result in the connection slot and apply it.
    fn absorb<B: Backend>(
        &mut self,
        conn: &mut Connection<B>,
        raw: Option<RawResult>,
    ) -> Result<Option<u64>> {
        let Some(raw) = raw else {
            self.state = ExecState::Idle;
            self.row_count = Some(0);
            return Ok(Some(0));
        };
        let raw = Arc::new(raw);
        conn.slot.store(SlotOwner::Statement(self.id), Arc::clone(&raw));
        self.apply(conn, raw)
    }

    fn apply<B: Backend>(
        &mut self,
        conn: &mut Connection<B>,
        raw: Arc<RawResult>,
    ) -> Result<Option<u64>> {
        match classify(&raw, conn.backend.is_broken()) {
            Outcome::Tuples { rows } => {
                if self.columns.is_none() {
                    self.columns = Some(columns_from(&raw.fields));
                }
                self.cursor = 0;
                self.row_count = Some(rows);
                self.result = Some(raw);
                self.state = ExecState::ResultReady;
                Ok(Some(rows))
            }
            Outcome::Command { rows } => {
                self.row_count = Some(rows);
                self.result = Some(raw);
                self.state = ExecState::Idle;
                Ok(Some(rows))
            }
            Outcome::Copy { mode, format } => {
                debug!("statement entered COPY {:?} ({:?})", mode, format);
                conn.copy.begin(mode, format, self.id);
                self.row_count = None;
                self.state = ExecState::InCopy;
                Ok(None)
            }
            Outcome::Failed(err) => {
                self.state = ExecState::Errored;
                Err(err)
            }
        }
    }

    // ========================================================================
    // Fetch
    // ========================================================================

    /// Next row of the current result set, `None` once exhausted.
    pub async fn fetch<B: Backend>(&mut self, conn: &mut Connection<B>) -> Result<Option<Row>> {
        self.sync_copy(conn);
        if self.async_status == AsyncStatus::Pending {
            self.adopt_async(conn).await?;
        }
        match self.state {
            ExecState::ResultReady => {}
            ExecState::Idle if self.executed => return Ok(None),
            state => {
                return Err(DriverError::ProtocolState(format!(
                    "no result set to fetch from (statement is {:?})",
                    state
                )))
            }
        }

        let (Some(result), Some(columns)) = (&self.result, &self.columns) else {
            self.state = ExecState::Idle;
            return Ok(None);
        };
        let Some(cells) = result.rows.get(self.cursor) else {
            self.state = ExecState::Idle;
            return Ok(None);
        };
        let values = decode_row(cells, columns, &conn.type_context());
        let row = Row::new(Arc::clone(columns), values);
        self.cursor += 1;
        if self.registry.has_inout() {
            self.registry.mirror_inout(row.values());
        }
        Ok(Some(row))
    }

    /// Every remaining row.
    pub async fn fetch_all<B: Backend>(&mut self, conn: &mut Connection<B>) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch(conn).await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Discard the rest of the current result set.
    pub fn finish<B: Backend>(&mut self, conn: &mut Connection<B>) {
        if self.state == ExecState::ResultReady {
            self.state = ExecState::Idle;
        }
        self.result = None;
        self.cursor = 0;
        conn.slot.release(self.id);
    }

    /// Release server-side resources held by this statement.
    pub async fn close<B: Backend>(mut self, conn: &mut Connection<B>) -> Result<()> {
        if self.async_status == AsyncStatus::Pending
            && conn.async_state.issuer() == Some(self.id)
        {
            match conn.cancel_async().await {
                Ok(()) | Err(DriverError::Cancel(CancelError::AlreadyFinished)) => {}
                Err(e) => return Err(e),
            }
        }
        conn.slot.release(self.id);
        self.deallocate(conn).await;
        Ok(())
    }

    /// Pick up the end of a COPY this statement started.
    fn sync_copy<B: Backend>(&mut self, conn: &mut Connection<B>) {
        if self.state == ExecState::InCopy && conn.copy.owner != Some(self.id) {
            self.state = ExecState::Idle;
            self.row_count = conn.copy.take_completed(self.id);
        }
    }

    /// Collect the result of this statement's asynchronous execution.
    async fn adopt_async<B: Backend>(&mut self, conn: &mut Connection<B>) -> Result<()> {
        if conn.async_state.is_pending() && conn.async_state.issuer() == Some(self.id) {
            if let Err(e @ DriverError::Copy(_)) = conn.wait_async().await {
                self.async_status = AsyncStatus::Idle;
                self.state = ExecState::InCopy;
                return Err(e);
            }
        }
        self.async_status = self.resolved_async_status(conn);
        match conn.slot.take_for(self.id) {
            Some(raw) => self.apply(conn, raw).map(|_| ()),
            // Cancelled: nothing to adopt
            None => {
                self.state = ExecState::Idle;
                Ok(())
            }
        }
    }

    fn resolved_async_status<B: Backend>(&self, conn: &Connection<B>) -> AsyncStatus {
        if conn.async_state.was_cancelled(self.id) {
            AsyncStatus::Cancelled
        } else {
            AsyncStatus::Idle
        }
    }
}

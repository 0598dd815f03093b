//! Asynchronous execution: poll, wait and cancel.

use std::sync::Arc;

use log::{debug, warn};

use super::{Connection, LastError};
use crate::error::{sqlstate, CancelError, DriverError, Result};
use crate::pg::{Backend, ExecStatus, RawResult, TransactionStatus};
use crate::statement::result::{classify, Outcome};
use crate::statement::StatementId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AsyncStatus {
    #[default]
    Idle,
    Pending,
    /// The last asynchronous query was cancelled.
    Cancelled,
}

/// Answer of a non-blocking poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncPoll {
    /// Nothing is running.
    Idle,
    /// The server is still working.
    Pending,
    /// Results are ready; `wait_async` will not block.
    Ready,
}

#[derive(Debug, Default)]
pub(crate) struct AsyncState {
    status: AsyncStatus,
    issuer: Option<StatementId>,
    /// Issuer of the last query the server confirmed as cancelled.
    cancelled: Option<StatementId>,
}

impl AsyncState {
    pub fn begin(&mut self, issuer: StatementId) {
        self.status = AsyncStatus::Pending;
        self.issuer = Some(issuer);
        if self.cancelled == Some(issuer) {
            self.cancelled = None;
        }
    }

    fn finish(&mut self, status: AsyncStatus) {
        self.status = status;
        if status == AsyncStatus::Cancelled {
            self.cancelled = self.issuer;
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status == AsyncStatus::Pending
    }

    /// Statement that issued the most recent asynchronous query.
    pub fn issuer(&self) -> Option<StatementId> {
        self.issuer
    }

    /// True when `id`'s latest asynchronous query was cancelled.
    pub fn was_cancelled(&self, id: StatementId) -> bool {
        self.cancelled == Some(id)
    }

    fn pending_issuer(&self) -> Option<StatementId> {
        if self.is_pending() {
            self.issuer
        } else {
            None
        }
    }
}

impl<B: Backend> Connection<B> {
    pub fn async_status(&self) -> AsyncStatus {
        self.async_state.status
    }

    /// Check without blocking whether the asynchronous query has finished.
    pub async fn poll_async(&mut self) -> Result<AsyncPoll> {
        if !self.async_state.is_pending() {
            return Ok(AsyncPoll::Idle);
        }
        self.backend.consume_input().await?;
        if self.backend.is_busy() {
            Ok(AsyncPoll::Pending)
        } else {
            Ok(AsyncPoll::Ready)
        }
    }

    /// Block until the asynchronous query finishes.
    ///
    /// The final result is kept for the issuing statement, which picks it
    /// up on its next `fetch`. Returns its row count.
    pub async fn wait_async(&mut self) -> Result<Option<u64>> {
        let Some(issuer) = self.async_state.pending_issuer() else {
            return Err(DriverError::ProtocolState(
                "no asynchronous query is running".to_string(),
            ));
        };

        let mut last: Option<RawResult> = None;
        loop {
            let raw = match self.backend.get_result().await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    self.async_state.finish(AsyncStatus::Idle);
                    return Err(e.into());
                }
            };
            match raw.status {
                ExecStatus::CopyIn => {
                    warn!("ending COPY FROM STDIN started by an asynchronous query");
                    self.backend.put_copy_end(None).await?;
                }
                ExecStatus::CopyOut | ExecStatus::CopyBoth => {
                    self.async_state.finish(AsyncStatus::Idle);
                    if let Outcome::Copy { mode, format } = classify(&raw, false) {
                        self.copy.begin(mode, format, issuer);
                    }
                    return Err(DriverError::Copy(
                        "asynchronous query started COPY TO STDOUT; read it with get_copy_data"
                            .to_string(),
                    ));
                }
                _ if last.as_ref().map_or(true, |l| !l.status.is_error()) => last = Some(raw),
                _ => {}
            }
        }
        self.async_state.finish(AsyncStatus::Idle);

        let Some(raw) = last else {
            return Ok(Some(0));
        };
        let raw = Arc::new(raw);
        let outcome = classify(&raw, self.backend.is_broken());
        self.slot.store_unadopted(issuer, raw);
        match outcome {
            Outcome::Tuples { rows } | Outcome::Command { rows } => Ok(Some(rows)),
            Outcome::Copy { .. } => Ok(None),
            Outcome::Failed(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Ask the server to cancel the asynchronous query.
    ///
    /// Succeeds only when the server confirms with `57014`. If the query
    /// finished first its result is kept for the issuing statement and
    /// `CancelError::AlreadyFinished` is returned.
    pub async fn cancel_async(&mut self) -> Result<()> {
        let Some(issuer) = self.async_state.pending_issuer() else {
            return Err(CancelError::NothingPending.into());
        };
        self.backend
            .cancel()
            .await
            .map_err(|e| CancelError::Transport(e.to_string()))?;

        let mut confirmed = None;
        let mut last: Option<RawResult> = None;
        loop {
            let raw = match self.backend.get_result().await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    self.async_state.finish(AsyncStatus::Idle);
                    return Err(e.into());
                }
            };
            match raw.status {
                ExecStatus::CopyIn => self.backend.put_copy_end(Some("query cancelled")).await?,
                ExecStatus::CopyOut | ExecStatus::CopyBoth => {
                    while self.backend.get_copy_data().await?.is_some() {}
                }
                _ => {
                    if let Some(fields) = raw
                        .error
                        .as_ref()
                        .filter(|f| f.code == sqlstate::QUERY_CANCELED)
                    {
                        confirmed = Some(fields.message.clone());
                    }
                    last = Some(raw);
                }
            }
        }

        let Some(message) = confirmed else {
            self.async_state.finish(AsyncStatus::Idle);
            if let Some(raw) = last {
                self.slot.store_unadopted(issuer, Arc::new(raw));
            }
            warn!("cancel request arrived after the query had finished");
            return Err(CancelError::AlreadyFinished.into());
        };

        debug!("asynchronous query cancelled");
        self.async_state.finish(AsyncStatus::Cancelled);
        self.slot.release(issuer);
        self.last_error = Some(LastError {
            sqlstate: sqlstate::QUERY_CANCELED.to_string(),
            message,
        });
        if self.backend.transaction_status() != TransactionStatus::Idle {
            self.run_control("ROLLBACK").await?;
            self.savepoints.clear();
        }
        Ok(())
    }
}

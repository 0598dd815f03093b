//! COPY sub-protocol.
//!
//! A statement whose result is CopyIn/CopyOut/CopyBoth puts the connection
//! into copy mode. Until the copy ends, every other command is refused.

use bytes::Bytes;
use log::debug;

use super::Connection;
use crate::error::{sqlstate, DriverError, Result};
use crate::pg::{Backend, Format, RawResult};
use crate::statement::result::{classify, Outcome};
use crate::statement::StatementId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CopyMode {
    #[default]
    None,
    /// COPY FROM STDIN
    In,
    /// COPY TO STDOUT
    Out,
    /// Replication streams
    Both,
}

/// One chunk of COPY TO STDOUT output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyChunk {
    pub data: Bytes,
    pub format: Format,
}

#[derive(Debug, Default)]
pub(crate) struct CopyState {
    pub mode: CopyMode,
    pub format: Format,
    /// Statement that started the copy.
    pub owner: Option<StatementId>,
    /// Row count of the last finished copy, kept for its statement.
    completed: Option<(StatementId, Option<u64>)>,
}

impl CopyState {
    pub fn begin(&mut self, mode: CopyMode, format: Format, owner: StatementId) {
        self.mode = mode;
        self.format = format;
        self.owner = Some(owner);
        self.completed = None;
    }

    fn end(&mut self, rows: Option<u64>) {
        if let Some(owner) = self.owner.take() {
            self.completed = Some((owner, rows));
        }
        self.mode = CopyMode::None;
    }

    pub fn take_completed(&mut self, id: StatementId) -> Option<u64> {
        match self.completed {
            Some((owner, rows)) if owner == id => {
                self.completed = None;
                rows
            }
            _ => None,
        }
    }

    fn accepts_input(&self) -> bool {
        matches!(self.mode, CopyMode::In | CopyMode::Both)
    }

    fn produces_output(&self) -> bool {
        matches!(self.mode, CopyMode::Out | CopyMode::Both)
    }
}

impl<B: Backend> Connection<B> {
    pub fn copy_mode(&self) -> CopyMode {
        self.copy.mode
    }

    /// Send one chunk of COPY FROM STDIN data.
    pub async fn put_copy_data(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        if !self.copy.accepts_input() {
            return Err(DriverError::Copy(format!(
                "put_copy_data needs COPY FROM STDIN, connection is in {:?}",
                self.copy.mode
            )));
        }
        self.backend.put_copy_data(data.as_ref()).await?;
        Ok(())
    }

    /// Finish COPY FROM STDIN; returns the number of rows copied.
    pub async fn put_copy_end(&mut self) -> Result<Option<u64>> {
        self.end_copy_in(None).await
    }

    /// Abort COPY FROM STDIN. The server's matching "query canceled"
    /// error is expected and not returned.
    pub async fn put_copy_fail(&mut self, reason: &str) -> Result<()> {
        match self.end_copy_in(Some(reason)).await {
            Ok(_) => Ok(()),
            Err(DriverError::Exec { sqlstate: code, .. }) if code == sqlstate::QUERY_CANCELED => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Next chunk of COPY TO STDOUT data; `None` once the copy is done.
    pub async fn get_copy_data(&mut self) -> Result<Option<CopyChunk>> {
        if !self.copy.produces_output() {
            return Err(DriverError::Copy(format!(
                "get_copy_data needs COPY TO STDOUT, connection is in {:?}",
                self.copy.mode
            )));
        }
        match self.backend.get_copy_data().await? {
            Some(data) => Ok(Some(CopyChunk {
                data,
                format: self.copy.format,
            })),
            None => {
                let raw = self.drain_results().await;
                self.finish_copy(raw)?;
                Ok(None)
            }
        }
    }

    async fn end_copy_in(&mut self, reason: Option<&str>) -> Result<Option<u64>> {
        if !self.copy.accepts_input() {
            return Err(DriverError::Copy(format!(
                "no COPY FROM STDIN to end, connection is in {:?}",
                self.copy.mode
            )));
        }
        self.backend.put_copy_end(reason).await?;
        let raw = self.drain_results().await;
        self.finish_copy(raw)
    }

    /// Leave copy mode with the final status of the COPY command.
    fn finish_copy(&mut self, raw: Result<Option<RawResult>>) -> Result<Option<u64>> {
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                self.copy.end(None);
                return Err(e);
            }
        };
        match raw.map(|r| classify(&r, self.backend.is_broken())) {
            Some(Outcome::Failed(err)) => {
                self.copy.end(None);
                self.record_error(&err);
                Err(err)
            }
            Some(Outcome::Command { rows }) | Some(Outcome::Tuples { rows }) => {
                debug!("COPY finished, {} rows", rows);
                self.copy.end(Some(rows));
                Ok(Some(rows))
            }
            _ => {
                self.copy.end(None);
                Ok(None)
            }
        }
    }
}

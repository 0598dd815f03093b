//! Server-side prepared statement lifecycle.
//!
//! A statement owns at most one named prepared statement on its connection.
//! Names are unique per process and carry the backend pid, so two
//! connections never collide even when they share a server.

use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, warn};

use super::Statement;
use crate::connection::{Connection, LastError};
use crate::error::{sqlstate, DriverError, Result};
use crate::pg::{Backend, TransactionStatus};
use crate::types::{quote_ident, Oid};

static NEXT_PREPARED: AtomicU32 = AtomicU32::new(1);

/// Name of a live server-side prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreparedName {
    pub name: String,
    /// Parameter types the server settled on.
    pub param_types: Vec<Oid>,
}

pub(crate) fn next_statement_name(backend_pid: i32) -> String {
    let n = NEXT_PREPARED.fetch_add(1, Ordering::Relaxed);
    format!("pgbridge_p{}_{}", backend_pid, n)
}

impl Statement {
    /// Make sure a named prepared statement exists for this statement.
    pub(crate) async fn ensure_prepared<B: Backend>(
        &mut self,
        conn: &mut Connection<B>,
    ) -> Result<()> {
        if self.prepared.is_some() {
            return Ok(());
        }
        let name = next_statement_name(conn.backend.backend_pid());
        let types = self.registry.declared_types();
        debug!("preparing {} as {}", name, self.numbered);

        conn.backend.send_prepare(&name, &self.numbered, &types).await?;
        let reply = conn.drain_results().await?;

        match reply {
            Some(raw) if !raw.status.is_error() => {
                self.registry.absorb_server_types(&raw.param_types);
                self.prepared = Some(PreparedName {
                    name,
                    param_types: raw.param_types,
                });
                self.prepare_failed = false;
                self.prepare_error = None;
                Ok(())
            }
            reply => {
                let (code, message) = match reply.and_then(|r| r.error) {
                    Some(fields) if !fields.code.is_empty() => (fields.code, fields.message),
                    Some(fields) => (sqlstate::DATA_EXCEPTION.to_string(), fields.message),
                    None => (
                        sqlstate::DATA_EXCEPTION.to_string(),
                        "server did not acknowledge the prepare".to_string(),
                    ),
                };
                self.prepared = None;
                self.prepare_failed = true;
                self.prepare_error = Some(LastError {
                    sqlstate: code.clone(),
                    message: message.clone(),
                });
                Err(DriverError::Prepare {
                    sqlstate: code,
                    message,
                })
            }
        }
    }

    /// Drop the prepared statement after a bound type changed.
    ///
    /// A failed transaction is rolled back first (to the newest savepoint
    /// when there is one) so the DEALLOCATE can run.
    pub(crate) async fn invalidate_and_reprepare<B: Backend>(
        &mut self,
        conn: &mut Connection<B>,
    ) -> Result<()> {
        self.needs_reprepare = false;
        let Some(prepared) = self.prepared.take() else {
            return Ok(());
        };
        debug!("types changed, re-preparing {}", prepared.name);

        if conn.backend.transaction_status() == TransactionStatus::Failed {
            match conn.savepoints.last().cloned() {
                Some(savepoint) => {
                    conn.run_control(&format!(
                        "ROLLBACK TO SAVEPOINT {}",
                        quote_ident(&savepoint)
                    ))
                    .await?
                }
                None => {
                    conn.run_control("ROLLBACK").await?;
                    conn.savepoints.clear();
                }
            }
        }
        deallocate_name(conn, &prepared.name).await;
        Ok(())
    }

    /// Release the server-side statement, if any.
    pub(crate) async fn deallocate<B: Backend>(&mut self, conn: &mut Connection<B>) {
        if let Some(prepared) = self.prepared.take() {
            if !conn.backend.is_broken() {
                deallocate_name(conn, &prepared.name).await;
            }
        }
    }
}

/// DEALLOCATE failures are logged, never raised.
async fn deallocate_name<B: Backend>(conn: &mut Connection<B>, name: &str) {
    debug!("deallocating {}", name);
    if let Err(e) = conn
        .run_control(&format!("DEALLOCATE {}", quote_ident(name)))
        .await
    {
        warn!("could not deallocate {}: {}", name, e);
    }
}

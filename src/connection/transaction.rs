//! Transaction control and the savepoint stack.

use log::{debug, warn};

use super::Connection;
use crate::error::{DriverError, Result};
use crate::pg::{Backend, TransactionStatus};
use crate::types::quote_ident;

impl<B: Backend> Connection<B> {
    /// Start a transaction explicitly.
    pub async fn begin_work(&mut self) -> Result<()> {
        if self.backend.transaction_status() != TransactionStatus::Idle {
            return Err(DriverError::ProtocolState(
                "a transaction is already open".to_string(),
            ));
        }
        self.open_transaction().await
    }

    pub async fn commit(&mut self) -> Result<()> {
        if self.backend.transaction_status() == TransactionStatus::Idle {
            warn!("commit with no open transaction has no effect");
            return Ok(());
        }
        self.run_control("COMMIT").await?;
        self.savepoints.clear();
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        if self.backend.transaction_status() == TransactionStatus::Idle {
            warn!("rollback with no open transaction has no effect");
            return Ok(());
        }
        self.run_control("ROLLBACK").await?;
        self.savepoints.clear();
        Ok(())
    }

    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        if self.backend.transaction_status() == TransactionStatus::Idle {
            if self.options.autocommit {
                return Err(DriverError::ProtocolState(
                    "savepoints need an open transaction".to_string(),
                ));
            }
            self.ensure_transaction().await?;
        }
        self.run_control(&format!("SAVEPOINT {}", quote_ident(name)))
            .await?;
        self.savepoints.push(name.to_string());
        Ok(())
    }

    pub async fn release(&mut self, name: &str) -> Result<()> {
        let index = self.savepoint_index(name)?;
        self.run_control(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
            .await?;
        self.savepoints.truncate(index);
        Ok(())
    }

    /// Roll back to `name`; the savepoint itself stays on the stack.
    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        let index = self.savepoint_index(name)?;
        self.run_control(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
            .await?;
        self.savepoints.truncate(index + 1);
        Ok(())
    }

    /// Open savepoints, oldest first.
    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    fn savepoint_index(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|s| s == name)
            .ok_or_else(|| DriverError::ProtocolState(format!("no savepoint named {}", name)))
    }

    /// Outside autocommit, open a transaction if the server reports none.
    pub(crate) async fn ensure_transaction(&mut self) -> Result<()> {
        if self.options.autocommit
            || self.backend.transaction_status() != TransactionStatus::Idle
        {
            return Ok(());
        }
        debug!("opening implicit transaction");
        self.open_transaction().await
    }

    async fn open_transaction(&mut self) -> Result<()> {
        self.run_control("BEGIN").await?;
        if self.options.read_only {
            self.run_control("SET TRANSACTION READ ONLY").await?;
        }
        Ok(())
    }
}

use crate::adapters::Statement;
use crate::pool::PoolShared;
use crate::values::bind_params;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Connection, Executor};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

/// One pooled connection lent to exactly one caller.
///
/// The connection goes back to the pool on [`release`](Self::release) or,
/// failing that, when it is dropped. Any transaction still open at that point
/// is rolled back first; a connection whose rollback fails is closed instead
/// of rejoining the idle set.
pub struct ManagedConnection {
    conn: Option<AnyConnection>,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<PoolShared>,
    transaction_active: bool,
    healthy: bool,
}

impl fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("released", &self.conn.is_none())
            .field("transaction_active", &self.transaction_active)
            .field("healthy", &self.healthy)
            .finish()
    }
}

impl ManagedConnection {
    pub(crate) fn new(conn: AnyConnection, permit: OwnedSemaphorePermit, shared: Arc<PoolShared>) -> Self {
        Self {
            conn: Some(conn),
            permit: Some(permit),
            shared,
            transaction_active: false,
            healthy: true,
        }
    }

    pub fn transaction_active(&self) -> bool {
        self.transaction_active
    }

    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn raw(&mut self) -> Result<&mut AnyConnection, sqlx::Error> {
        self.conn.as_mut().ok_or_else(|| {
            sqlx::Error::Protocol("connection has already been returned to the pool".to_string())
        })
    }

    /// Runs `statement` and returns the number of affected rows.
    ///
    /// A transaction left open by a dropped [`TransactionScope`] is rolled
    /// back first, so the statement never lands in a dead transaction.
    pub async fn execute(&mut self, statement: &Statement) -> Result<u64, sqlx::Error> {
        self.settle_abandoned().await?;
        self.run(statement).await
    }

    /// Runs unparameterized SQL, which may hold several statements.
    pub async fn execute_raw(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        self.settle_abandoned().await?;
        self.run_raw(sql).await
    }

    pub async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<AnyRow>, sqlx::Error> {
        self.settle_abandoned().await?;
        self.run_fetch(statement).await
    }

    // A live scope borrows the connection mutably, so an active transaction
    // seen from here belongs to a scope that is gone.
    async fn settle_abandoned(&mut self) -> Result<(), sqlx::Error> {
        if self.transaction_active {
            tracing::debug!("Rolling back a transaction left open by a dropped scope.");
            self.rollback_pending().await?;
        }
        Ok(())
    }

    async fn run(&mut self, statement: &Statement) -> Result<u64, sqlx::Error> {
        let conn = self.raw()?;
        let query = bind_params(sqlx::query(&statement.sql), &statement.params);
        Ok(query.execute(&mut *conn).await?.rows_affected())
    }

    async fn run_raw(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        let conn = self.raw()?;
        Ok(Executor::execute(&mut *conn, sqlx::raw_sql(sql)).await?.rows_affected())
    }

    async fn run_fetch(&mut self, statement: &Statement) -> Result<Vec<AnyRow>, sqlx::Error> {
        let conn = self.raw()?;
        let query = bind_params(sqlx::query(&statement.sql), &statement.params);
        query.fetch_all(&mut *conn).await
    }

    /// Opens a transaction scope.
    ///
    /// A transaction left open by an abandoned scope is rolled back first.
    pub async fn transaction(&mut self) -> Result<TransactionScope<'_>, sqlx::Error> {
        self.settle_abandoned().await?;
        let begin = self.shared.adapter.begin_statement();
        self.run_raw(begin).await?;
        self.transaction_active = true;
        Ok(TransactionScope {
            conn: self,
            finished: false,
        })
    }

    async fn rollback_pending(&mut self) -> Result<(), sqlx::Error> {
        match self.run_raw("ROLLBACK").await {
            Ok(_) => {
                self.transaction_active = false;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rollback failed; the connection will be discarded.");
                self.healthy = false;
                Err(e)
            }
        }
    }

    /// Returns the connection to the pool, rolling back any open transaction
    /// first. Calling it again is a no-op.
    pub async fn release(&mut self) {
        if self.conn.is_none() {
            return;
        }
        if self.transaction_active && self.healthy {
            // A failure marks the connection unhealthy; the error is already logged.
            let _ = self.rollback_pending().await;
        }
        let Some(conn) = self.conn.take() else { return };
        if let Some(discarded) = self.shared.check_in(conn, self.healthy && !self.transaction_active) {
            if let Err(e) = discarded.close().await {
                tracing::debug!(error = %e, "Error while closing a discarded connection.");
            }
        }
        self.permit.take();
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else { return };
        let permit = self.permit.take();

        if !self.transaction_active {
            drop(self.shared.check_in(conn, self.healthy));
            drop(permit);
            return;
        }

        // The owner went away mid-transaction (an early return or a cancelled
        // future). Roll back on the runtime if there is one; otherwise the
        // connection cannot be trusted and is discarded.
        let shared = self.shared.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let healthy = match Executor::execute(&mut conn, sqlx::raw_sql("ROLLBACK")).await {
                        Ok(_) => true,
                        Err(e) => {
                            tracing::warn!(error = %e, "Rollback of an abandoned transaction failed.");
                            false
                        }
                    };
                    if let Some(discarded) = shared.check_in(conn, healthy) {
                        let _ = discarded.close().await;
                    }
                    drop(permit);
                });
            }
            Err(_) => {
                drop(shared.check_in(conn, false));
                drop(permit);
            }
        }
    }
}

/// An open transaction on a [`ManagedConnection`].
///
/// `commit` and `rollback` consume the scope, so exactly one of them can run.
/// A scope dropped without either (an early `?` return, say) leaves the
/// transaction marked active; the connection rolls it back before its next
/// statement, on release, or when it is dropped.
pub struct TransactionScope<'c> {
    conn: &'c mut ManagedConnection,
    finished: bool,
}

impl TransactionScope<'_> {
    pub async fn execute(&mut self, statement: &Statement) -> Result<u64, sqlx::Error> {
        self.conn.run(statement).await
    }

    pub async fn execute_raw(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        self.conn.run_raw(sql).await
    }

    pub async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<AnyRow>, sqlx::Error> {
        self.conn.run_fetch(statement).await
    }

    /// Issues `COMMIT`. If the commit fails the transaction is rolled back
    /// (or the connection marked unhealthy) before the error is returned.
    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        self.finished = true;
        match self.conn.run_raw("COMMIT").await {
            Ok(_) => {
                self.conn.transaction_active = false;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Commit failed; rolling back.");
                let _ = self.conn.rollback_pending().await;
                Err(e)
            }
        }
    }

    pub async fn rollback(mut self) -> Result<(), sqlx::Error> {
        self.finished = true;
        self.conn.rollback_pending().await
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("Transaction scope dropped without commit; rollback pending.");
        }
    }
}

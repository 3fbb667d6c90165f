//! Transaction manager implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dbpool_core::{Connection, DbPoolError, Result};
use parking_lot::Mutex;
use uuid::Uuid;

use super::config::TransactionConfig;
use super::context::{TransactionContext, TransactionInfo};
use super::registry::TransactionRegistry;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::scheduler::PeriodicTask;

struct ManagerShared {
    pool: ConnectionPool,
    registry: TransactionRegistry,
    timeout_ms: AtomicU64,
    closed: AtomicBool,
    cleanup: Mutex<Option<PeriodicTask>>,
}

/// Coordinates transactions that several workers drive by id
///
/// Each transaction pins one pooled connection with autocommit disabled
/// until it is committed, rolled back, or timed out by the cleanup pass.
/// Cloning a `TransactionManager` yields another handle to the same
/// registry.
#[derive(Clone)]
pub struct TransactionManager {
    shared: Arc<ManagerShared>,
}

impl TransactionManager {
    /// Create a manager with the default timeout and cleanup interval
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(pool: ConnectionPool) -> Self {
        Self::start(pool, TransactionConfig::default())
    }

    /// Create a manager with explicit settings
    pub fn with_config(pool: ConnectionPool, config: TransactionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::start(pool, config))
    }

    fn start(pool: ConnectionPool, config: TransactionConfig) -> Self {
        let shared = Arc::new(ManagerShared {
            pool,
            registry: TransactionRegistry::default(),
            timeout_ms: AtomicU64::new(config.timeout_ms),
            closed: AtomicBool::new(false),
            cleanup: Mutex::new(None),
        });

        let task = PeriodicTask::spawn(
            "transaction-cleanup",
            config.cleanup_interval(),
            Arc::downgrade(&shared),
            |manager: Arc<ManagerShared>| async move {
                manager.cleanup_expired().await;
            },
        );
        *shared.cleanup.lock() = Some(task);

        tracing::info!(
            timeout_ms = config.timeout_ms,
            cleanup_interval_ms = config.cleanup_interval_ms,
            "transaction manager started"
        );

        Self { shared }
    }

    /// Begin a new transaction and return its id
    ///
    /// Borrows a connection, disables autocommit and opens a transaction on
    /// it. If opening fails the connection goes back to the pool.
    #[tracing::instrument(skip(self), fields(transaction_id))]
    pub async fn begin_transaction(&self) -> Result<String> {
        if self.is_closed() {
            return Err(DbPoolError::TransactionManagerClosed);
        }

        let conn = self.shared.pool.get_connection().await?;
        if let Err(e) = open(&conn).await {
            tracing::warn!(connection_id = conn.id(), error = %e, "failed to begin transaction");
            release(&self.shared.pool, &conn).await;
            return Err(e);
        }

        conn.pin();
        let transaction_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("transaction_id", transaction_id.as_str());
        let connection_id = conn.id();
        self.shared.registry.insert(Arc::new(TransactionContext::new(
            transaction_id.clone(),
            conn,
        )));

        if self.is_closed() {
            // close() may have drained the registry before our insert.
            if let Some(context) = self.shared.registry.remove(&transaction_id) {
                if context.finish().is_ok() {
                    abort(&self.shared.pool, &context).await;
                }
            }
            return Err(DbPoolError::TransactionManagerClosed);
        }

        tracing::debug!(connection_id, "transaction started");
        Ok(transaction_id)
    }

    /// Get the connection of an open transaction
    ///
    /// Also counts as activity for the idle timeout. The connection stays
    /// pinned to the transaction: closing or returning it is a no-op until
    /// the transaction is committed or rolled back.
    pub async fn get_transaction_connection(
        &self,
        transaction_id: &str,
    ) -> Result<Arc<PooledConnection>> {
        match self.shared.registry.touch(transaction_id) {
            Some(context) if context.is_active() => Ok(context.connection().clone()),
            _ => Err(DbPoolError::TransactionNotFound(transaction_id.to_string())),
        }
    }

    /// Commit a transaction and return its connection to the pool
    ///
    /// If the commit fails the transaction is rolled back, the connection is
    /// still released, and the commit error is returned.
    #[tracing::instrument(skip(self))]
    pub async fn commit_transaction(&self, transaction_id: &str) -> Result<()> {
        let context = self.take(transaction_id)?;
        let conn = context.connection();

        if let Err(e) = conn.commit().await {
            tracing::warn!(error = %e, "commit failed, rolling back");
            abort(&self.shared.pool, &context).await;
            return Err(e);
        }

        release(&self.shared.pool, conn).await;
        tracing::debug!(connection_id = conn.id(), "transaction committed");
        Ok(())
    }

    /// Roll back a transaction and return its connection to the pool
    ///
    /// If the rollback fails the connection is closed rather than reused.
    #[tracing::instrument(skip(self))]
    pub async fn rollback_transaction(&self, transaction_id: &str) -> Result<()> {
        let context = self.take(transaction_id)?;
        let conn = context.connection();

        if let Err(e) = conn.rollback().await {
            tracing::warn!(error = %e, "rollback failed, closing connection");
            discard(&self.shared.pool, conn).await;
            return Err(e);
        }

        release(&self.shared.pool, conn).await;
        tracing::debug!(connection_id = conn.id(), "transaction rolled back");
        Ok(())
    }

    /// Whether the id names an open transaction
    pub fn is_transaction_active(&self, transaction_id: &str) -> bool {
        self.shared
            .registry
            .get(transaction_id)
            .is_some_and(|context| context.is_active())
    }

    /// Number of open transactions
    pub fn active_transaction_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Snapshot of an open transaction, or `None` if the id is unknown
    pub fn transaction_info(&self, transaction_id: &str) -> Option<TransactionInfo> {
        self.shared
            .registry
            .get(transaction_id)
            .map(|context| context.info())
    }

    /// Change the idle timeout used by subsequent cleanup passes
    pub fn set_transaction_timeout(&self, timeout: Duration) {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.shared.timeout_ms.store(timeout_ms, Ordering::SeqCst);
    }

    pub fn transaction_timeout(&self) -> Duration {
        self.shared.timeout()
    }

    /// Roll back every transaction idle past the timeout
    ///
    /// Runs on the cleanup interval; call it directly to force a pass.
    /// Returns how many transactions were rolled back.
    pub async fn cleanup_expired(&self) -> usize {
        self.shared.cleanup_expired().await
    }

    /// Close the manager
    ///
    /// Stops the cleanup pass, rolls back every open transaction and refuses
    /// further `begin_transaction` calls. The pool itself stays open.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let task = self.shared.cleanup.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }

        let open = self.shared.registry.drain();
        let count = open.len();
        for context in open {
            if context.finish().is_ok() {
                abort(&self.shared.pool, &context).await;
            }
        }

        tracing::info!(rolled_back = count, "transaction manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Remove a transaction from the registry, claiming its terminal event
    fn take(&self, transaction_id: &str) -> Result<Arc<TransactionContext>> {
        let context = self
            .shared
            .registry
            .remove(transaction_id)
            .ok_or_else(|| DbPoolError::TransactionNotFound(transaction_id.to_string()))?;
        context.finish()?;
        Ok(context)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_transactions", &self.active_transaction_count())
            .field("timeout", &self.transaction_timeout())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ManagerShared {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    async fn cleanup_expired(&self) -> usize {
        let timeout = self.timeout();
        let expired = self.registry.take_expired(timeout);
        let mut rolled_back = 0;

        for context in expired {
            if context.finish().is_err() {
                continue;
            }
            tracing::info!(
                transaction_id = context.transaction_id(),
                idle_for = ?context.idle_for(),
                timeout = ?timeout,
                "rolling back timed out transaction"
            );
            abort(&self.pool, &context).await;
            rolled_back += 1;
        }

        rolled_back
    }
}

impl Drop for ManagerShared {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropped without close(): give the connections back in the background.
        let open = self.registry.drain();
        if open.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.pool.clone();
                handle.spawn(async move {
                    for context in open {
                        if context.finish().is_ok() {
                            abort(&pool, &context).await;
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    count = open.len(),
                    "transaction manager dropped outside a runtime with open transactions"
                );
            }
        }
    }
}

/// Put a freshly borrowed connection into transactional mode
async fn open(conn: &PooledConnection) -> Result<()> {
    conn.set_auto_commit(false).await?;
    conn.begin_transaction().await
}

/// Restore autocommit and hand the connection back, or close it if the
/// session cannot be reset
async fn release(pool: &ConnectionPool, conn: &Arc<PooledConnection>) {
    match conn.set_auto_commit(true).await {
        Ok(()) => {
            conn.unpin();
            pool.return_connection(conn).await;
        }
        Err(e) => {
            tracing::warn!(connection_id = conn.id(), error = %e, "could not restore autocommit, closing connection");
            discard(pool, conn).await;
        }
    }
}

/// Close a connection whose session state is unknown
async fn discard(pool: &ConnectionPool, conn: &Arc<PooledConnection>) {
    conn.unpin();
    pool.invalidate_connection(conn).await;
}

/// Best-effort rollback followed by release; errors are logged
async fn abort(pool: &ConnectionPool, context: &TransactionContext) {
    let conn = context.connection();
    match conn.rollback().await {
        Ok(()) => release(pool, conn).await,
        Err(e) => {
            tracing::warn!(
                transaction_id = context.transaction_id(),
                error = %e,
                "rollback failed, closing connection"
            );
            discard(pool, conn).await;
        }
    }
}

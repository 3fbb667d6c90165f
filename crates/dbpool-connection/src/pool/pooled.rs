//! Leased connection proxy

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dbpool_core::{Connection, DbPoolError, IsolationLevel, Result, StatementResult};
use parking_lot::Mutex;

use super::config::PoolConfig;
use super::pool::PoolShared;

/// Why an idle connection is due for eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// Connection exceeded max lifetime
    LifetimeExpired,
    /// Connection exceeded idle timeout
    IdleExpired,
}

/// A connection borrowed from a [`ConnectionPool`](super::ConnectionPool).
///
/// Behaves like the wrapped [`Connection`] except that `close` hands it back
/// to the pool instead of ending the session. The proxy only keeps a `Weak`
/// handle to its pool plus a liveness flag the pool clears on shutdown; once
/// either is gone, `close` really closes the wrapped connection.
pub struct PooledConnection {
    id: u64,
    connection: Arc<dyn Connection>,
    created_at: Instant,
    last_used_at: Mutex<Instant>,
    active: AtomicBool,
    pinned: AtomicBool,
    closed: AtomicBool,
    pool: Weak<PoolShared>,
    pool_alive: Arc<AtomicBool>,
    me: Weak<PooledConnection>,
}

impl PooledConnection {
    pub(crate) fn new(
        id: u64,
        connection: Arc<dyn Connection>,
        pool: Weak<PoolShared>,
        pool_alive: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new_cyclic(|me| Self {
            id,
            connection,
            created_at: now,
            last_used_at: Mutex::new(now),
            active: AtomicBool::new(false),
            pinned: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            pool,
            pool_alive,
            me: me.clone(),
        })
    }

    /// Pool-local id of this connection
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The wrapped backend connection
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        *self.last_used_at.lock()
    }

    /// Time since the connection was last used
    pub fn idle_for(&self) -> Duration {
        self.last_used_at().elapsed()
    }

    /// Whether the connection is currently lent out
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether an open transaction owns this connection
    ///
    /// A pinned connection cannot be returned or invalidated through the
    /// pool; only the transaction manager releases it.
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::SeqCst)
    }

    /// Hand the connection back to its pool.
    ///
    /// Returning a connection that is not lent out, or one pinned by an open
    /// transaction, is a no-op. If the pool has been closed or dropped the
    /// wrapped connection is closed instead.
    pub async fn return_to_pool(&self) -> Result<()> {
        if !self.is_active() {
            tracing::debug!(connection_id = self.id, "ignoring return of connection that is not lent out");
            return Ok(());
        }
        if self.is_pinned() {
            tracing::debug!(connection_id = self.id, "ignoring return of connection pinned by a transaction");
            return Ok(());
        }

        if self.pool_alive.load(Ordering::SeqCst) {
            if let (Some(pool), Some(me)) = (self.pool.upgrade(), self.me.upgrade()) {
                pool.release(&me).await;
                return Ok(());
            }
        }

        tracing::debug!(connection_id = self.id, "pool is gone, closing connection");
        self.try_deactivate();
        self.terminate().await
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolShared>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }

    pub(crate) fn pin(&self) {
        self.pinned.store(true, Ordering::SeqCst);
    }

    pub(crate) fn unpin(&self) {
        self.pinned.store(false, Ordering::SeqCst);
    }

    pub(crate) fn touch(&self) {
        *self.last_used_at.lock() = Instant::now();
    }

    /// idle -> active; false if the connection was already lent out or closed
    pub(crate) fn try_activate(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let activated = self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if activated {
            self.touch();
        }
        activated
    }

    /// active -> idle; false if the connection was not lent out
    pub(crate) fn try_deactivate(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn expiry(&self, config: &PoolConfig) -> Option<ExpiryReason> {
        if self.created_at.elapsed() > config.max_lifetime() {
            Some(ExpiryReason::LifetimeExpired)
        } else if self.idle_for() > config.idle_timeout() {
            Some(ExpiryReason::IdleExpired)
        } else {
            None
        }
    }

    /// Close the wrapped connection. Only the first call reaches the backend.
    pub(crate) async fn terminate(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connection.close().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbPoolError::Connection(format!(
                "pooled connection {} is closed",
                self.id
            )));
        }
        self.touch();
        Ok(())
    }
}

#[async_trait]
impl Connection for PooledConnection {
    fn driver_name(&self) -> &str {
        self.connection.driver_name()
    }

    async fn execute(&self, sql: &str) -> Result<StatementResult> {
        self.ensure_open()?;
        self.connection.execute(sql).await
    }

    async fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.connection.is_valid().await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.ensure_open()?;
        self.connection.begin_transaction().await
    }

    async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        self.connection.commit().await
    }

    async fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        self.connection.rollback().await
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        self.connection.set_auto_commit(enabled).await
    }

    async fn isolation_level(&self) -> Result<IsolationLevel> {
        self.ensure_open()?;
        self.connection.isolation_level().await
    }

    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.ensure_open()?;
        self.connection.set_isolation_level(level).await
    }

    /// Return to the pool; see [`PooledConnection::return_to_pool`]
    async fn close(&self) -> Result<()> {
        self.return_to_pool().await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("driver", &self.connection.driver_name())
            .field("active", &self.is_active())
            .field("pinned", &self.is_pinned())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

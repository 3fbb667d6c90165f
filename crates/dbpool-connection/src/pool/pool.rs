//! Connection pool implementation

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dbpool_core::{Connection, ConnectionTarget, DbPoolError, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::config::PoolConfig;
use super::pooled::{ExpiryReason, PooledConnection};
use super::stats::{PoolCounters, PoolStats};
use crate::health::ConnectionValidator;
use crate::scheduler::PeriodicTask;

/// Factory trait for opening new backend connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a new connection to the given target
    async fn create(&self, target: &ConnectionTarget) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self, target: &ConnectionTarget) -> Result<Arc<dyn Connection>> {
        (**self).create(target).await
    }
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Idle connections past their max lifetime
    pub lifetime_expired: usize,
    /// Idle connections past the idle timeout
    pub idle_expired: usize,
    /// Idle connections that failed validation
    pub invalid: usize,
    /// Connections opened to restore `min_idle`
    pub created: usize,
}

impl MaintenanceReport {
    pub fn evicted(&self) -> usize {
        self.lifetime_expired + self.idle_expired + self.invalid
    }
}

/// Every live connection, plus slots reserved by in-flight creations
#[derive(Default)]
struct ConnectionSet {
    connections: HashMap<u64, Arc<PooledConnection>>,
    creating: usize,
}

/// State shared by every handle to a pool and, weakly, by its connections
pub(crate) struct PoolShared {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    validator: ConnectionValidator,
    /// Connections available for lending
    idle: Mutex<VecDeque<Arc<PooledConnection>>>,
    all: Mutex<ConnectionSet>,
    active_count: AtomicUsize,
    waiting_count: AtomicUsize,
    running: AtomicBool,
    /// Cleared on shutdown; outlives the pool inside every `PooledConnection`
    alive: Arc<AtomicBool>,
    available: Notify,
    next_id: AtomicU64,
    counters: PoolCounters,
    maintenance: Mutex<Option<PeriodicTask>>,
}

/// A bounded pool of database connections
///
/// The pool creates `initial_size` connections up front and then lends them
/// out on demand, creating more up to `max_size`. A background maintenance
/// task evicts idle connections that outlived `idle_timeout` or
/// `max_lifetime` and tops the idle set back up to `min_idle`.
///
/// Cloning a `ConnectionPool` yields another handle to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Create a pool, open its initial connections and start maintenance.
    ///
    /// Fails if the configuration is invalid or any initial connection
    /// cannot be opened; connections opened before the failure are closed.
    pub async fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(PoolShared {
            validator: ConnectionValidator::from_config(&config),
            config,
            factory: Arc::new(factory),
            idle: Mutex::new(VecDeque::new()),
            all: Mutex::new(ConnectionSet::default()),
            active_count: AtomicUsize::new(0),
            waiting_count: AtomicUsize::new(0),
            running: AtomicBool::new(true),
            alive: Arc::new(AtomicBool::new(true)),
            available: Notify::new(),
            next_id: AtomicU64::new(1),
            counters: PoolCounters::default(),
            maintenance: Mutex::new(None),
        });

        for _ in 0..shared.config.initial_size() {
            if !shared.try_reserve_slot() {
                break;
            }
            match shared.open_connection().await {
                Ok(conn) => shared.push_idle(conn),
                Err(e) => {
                    tracing::error!(error = %e, "failed to open initial connection");
                    shared.shutdown().await;
                    return Err(e);
                }
            }
        }

        let task = PeriodicTask::spawn(
            "pool-maintenance",
            shared.config.maintenance_interval(),
            Arc::downgrade(&shared),
            |pool: Arc<PoolShared>| async move {
                pool.run_maintenance().await;
            },
        );
        *shared.maintenance.lock() = Some(task);

        tracing::info!(
            driver = %shared.config.target().driver,
            initial = shared.config.initial_size(),
            max = shared.config.max_size(),
            min_idle = shared.config.min_idle(),
            "connection pool started"
        );

        Ok(Self { shared })
    }

    /// Borrow a connection from the pool
    ///
    /// This will:
    /// 1. Take an idle connection, validating it first when `test_on_borrow`
    ///    is set; invalid ones are discarded and the search continues
    /// 2. If none is idle and the pool is under `max_size`, open a new one
    /// 3. Otherwise wait for a connection to be returned, up to `max_wait`
    ///
    /// Returns `PoolExhausted` if the wait times out, `PoolClosed` if the
    /// pool is closed, and `ConnectionCreationFailed` if opening a new
    /// connection fails.
    pub async fn get_connection(&self) -> Result<Arc<PooledConnection>> {
        let shared = &self.shared;
        let max_wait = shared.config.max_wait();
        let deadline = Instant::now() + max_wait;
        let mut discarded = 0usize;

        loop {
            if !shared.is_running() {
                return Err(DbPoolError::PoolClosed);
            }
            // After a discard, only keep looking while the borrow budget lasts.
            if discarded > 0 && Instant::now() >= deadline {
                shared.counters.record_exhausted();
                return Err(DbPoolError::PoolExhausted(format!(
                    "no valid connection within {:?} ({} discarded)",
                    max_wait, discarded
                )));
            }

            if let Some(conn) = shared.pop_idle() {
                if shared.config.test_on_borrow()
                    && !shared.validator.validate(conn.connection().as_ref()).await
                {
                    shared.counters.record_validation_failure();
                    shared.discard(&conn, "failed validation on borrow").await;
                    discarded += 1;
                    continue;
                }
                return shared.lend(conn).await;
            }

            if shared.try_reserve_slot() {
                let conn = shared.open_connection().await?;
                return shared.lend(conn).await;
            }

            // Register interest before re-checking so a return between the
            // check and the wait is not lost.
            let notified = shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shared.has_capacity() || !shared.is_running() {
                continue;
            }

            shared.waiting_count.fetch_add(1, Ordering::SeqCst);
            let waited = tokio::time::timeout_at(deadline, notified).await;
            shared.waiting_count.fetch_sub(1, Ordering::SeqCst);

            if waited.is_err() {
                if shared.has_capacity() {
                    // A wakeup may have landed on us as we timed out; pass it on.
                    shared.available.notify_one();
                }
                shared.counters.record_exhausted();
                tracing::debug!(timeout = ?max_wait, "timed out waiting for a connection");
                return Err(DbPoolError::PoolExhausted(format!(
                    "timed out waiting for connection (timeout: {:?})",
                    max_wait
                )));
            }
        }
    }

    /// Return a borrowed connection to the pool
    ///
    /// Returning a connection that is not lent out is a no-op. A connection
    /// that fails `test_on_return` validation is closed and not replaced.
    pub async fn return_connection(&self, conn: &Arc<PooledConnection>) {
        if conn.belongs_to(&self.shared) {
            self.shared.release(conn).await;
        } else {
            tracing::warn!(connection_id = conn.id(), "connection returned to a pool that does not own it");
            if let Err(e) = conn.return_to_pool().await {
                tracing::warn!(connection_id = conn.id(), error = %e, "failed to hand connection back to its own pool");
            }
        }
    }

    /// Close a borrowed connection instead of returning it.
    ///
    /// Use this when the caller knows the session is broken; the slot is
    /// freed for a new connection. Connections pinned by an open transaction
    /// are left alone.
    pub async fn invalidate_connection(&self, conn: &Arc<PooledConnection>) {
        if conn.is_pinned() {
            tracing::debug!(connection_id = conn.id(), "ignoring invalidation of connection pinned by a transaction");
            return;
        }
        if !conn.belongs_to(&self.shared) || !conn.try_deactivate() {
            return;
        }
        self.shared.active_count.fetch_sub(1, Ordering::SeqCst);
        self.shared.discard(conn, "invalidated by caller").await;
    }

    /// Run one maintenance pass now instead of waiting for the scheduler
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.shared.run_maintenance().await
    }

    /// Close the pool
    ///
    /// Stops maintenance, closes every connection whether idle or lent out,
    /// and wakes all waiting borrowers. Connections still held by callers
    /// close themselves when they are returned.
    pub async fn close(&self) {
        self.shared.shutdown().await;
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Number of connections currently lent out
    pub fn active_count(&self) -> usize {
        self.shared.active_count.load(Ordering::SeqCst)
    }

    /// Number of connections available for lending
    pub fn idle_count(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Number of live connections, idle or lent out
    pub fn total_count(&self) -> usize {
        self.shared.all.lock().connections.len()
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            total: self.total_count(),
            idle: self.idle_count(),
            active: self.active_count(),
            waiting: self.shared.waiting_count.load(Ordering::SeqCst),
            ..Default::default()
        };
        self.shared.counters.fill(&mut stats);
        stats
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .field(
                "maintenance",
                &self
                    .shared
                    .maintenance
                    .lock()
                    .as_ref()
                    .is_some_and(|task| task.is_running()),
            )
            .finish_non_exhaustive()
    }
}

impl PoolShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn pop_idle(&self) -> Option<Arc<PooledConnection>> {
        self.idle.lock().pop_front()
    }

    fn push_idle(&self, conn: Arc<PooledConnection>) {
        self.idle.lock().push_back(conn);
        self.available.notify_one();
    }

    fn has_capacity(&self) -> bool {
        if !self.idle.lock().is_empty() {
            return true;
        }
        let all = self.all.lock();
        all.connections.len() + all.creating < self.config.max_size()
    }

    /// Reserve room for one new connection under `max_size`
    fn try_reserve_slot(&self) -> bool {
        let mut all = self.all.lock();
        if all.connections.len() + all.creating < self.config.max_size() {
            all.creating += 1;
            true
        } else {
            false
        }
    }

    fn release_slot(&self) {
        let mut all = self.all.lock();
        all.creating = all.creating.saturating_sub(1);
        drop(all);
        self.available.notify_one();
    }

    /// Open a connection into a slot reserved with `try_reserve_slot`
    async fn open_connection(self: &Arc<Self>) -> Result<Arc<PooledConnection>> {
        let raw = match self.factory.create(self.config.target()).await {
            Ok(raw) => raw,
            Err(e) => {
                self.release_slot();
                tracing::warn!(error = %e, "failed to open connection");
                return Err(match e {
                    DbPoolError::ConnectionCreationFailed(_) => e,
                    other => DbPoolError::ConnectionCreationFailed(other.to_string()),
                });
            }
        };

        if let Some(level) = self.config.default_isolation_level() {
            if let Err(e) = raw.set_isolation_level(level).await {
                self.release_slot();
                let _ = raw.close().await;
                return Err(DbPoolError::ConnectionCreationFailed(format!(
                    "failed to apply isolation level {}: {}",
                    level, e
                )));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let conn = PooledConnection::new(id, raw, Arc::downgrade(self), self.alive.clone());
        {
            let mut all = self.all.lock();
            all.creating = all.creating.saturating_sub(1);
            all.connections.insert(id, conn.clone());
        }
        self.counters.record_created();

        if !self.is_running() {
            // Lost a race with close(); it may already have swept `all`.
            self.discard(&conn, "pool closed during creation").await;
            return Err(DbPoolError::PoolClosed);
        }

        tracing::debug!(connection_id = id, "opened new connection");
        Ok(conn)
    }

    /// Mark a connection lent out
    async fn lend(&self, conn: Arc<PooledConnection>) -> Result<Arc<PooledConnection>> {
        // Counted before activation so whoever deactivates it has a unit to take back.
        self.active_count.fetch_add(1, Ordering::SeqCst);
        let activated = conn.try_activate();
        if !activated || !self.is_running() {
            // close() swept the connection, or is sweeping, after we took it.
            // Exactly one of us or the sweep wins the deactivation.
            if !activated || conn.try_deactivate() {
                self.active_count.fetch_sub(1, Ordering::SeqCst);
            }
            self.discard(&conn, "closed before it could be lent").await;
            return Err(DbPoolError::PoolClosed);
        }
        tracing::debug!(connection_id = conn.id(), "lent connection");
        Ok(conn)
    }

    /// Take back a lent connection
    pub(crate) async fn release(&self, conn: &Arc<PooledConnection>) {
        if conn.is_pinned() {
            tracing::debug!(connection_id = conn.id(), "ignoring return of connection pinned by a transaction");
            return;
        }
        if !conn.try_deactivate() {
            tracing::debug!(connection_id = conn.id(), "ignoring return of connection that is not lent out");
            return;
        }
        self.active_count.fetch_sub(1, Ordering::SeqCst);

        if !self.is_running() {
            self.discard(conn, "returned after pool close").await;
            return;
        }

        if self.config.test_on_return()
            && !self.validator.validate(conn.connection().as_ref()).await
        {
            self.counters.record_validation_failure();
            self.discard(conn, "failed validation on return").await;
            return;
        }

        conn.touch();
        self.push_idle(conn.clone());
        tracing::debug!(connection_id = conn.id(), "returned connection to pool");
    }

    /// Close a connection that is neither idle nor lent and forget it
    async fn discard(&self, conn: &Arc<PooledConnection>, reason: &'static str) {
        let removed = self.all.lock().connections.remove(&conn.id()).is_some();
        if let Err(e) = conn.terminate().await {
            tracing::warn!(connection_id = conn.id(), error = %e, "error closing connection");
        }
        if removed {
            self.counters.record_closed();
            self.available.notify_one();
        }
        tracing::debug!(connection_id = conn.id(), reason, "discarded connection");
    }

    pub(crate) async fn run_maintenance(self: &Arc<Self>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        if !self.is_running() {
            return report;
        }

        let expired: Vec<(Arc<PooledConnection>, ExpiryReason)> = {
            let mut idle = self.idle.lock();
            let mut expired = Vec::new();
            idle.retain(|conn| match conn.expiry(&self.config) {
                Some(reason) => {
                    expired.push((conn.clone(), reason));
                    false
                }
                None => true,
            });
            expired
        };

        for (conn, reason) in expired {
            match reason {
                ExpiryReason::LifetimeExpired => report.lifetime_expired += 1,
                ExpiryReason::IdleExpired => report.idle_expired += 1,
            }
            self.discard(&conn, "expired while idle").await;
        }

        // Validate a snapshot outside the lock. The connections stay in the
        // idle queue, so borrowers can still take them meanwhile.
        let candidates: Vec<Arc<PooledConnection>> = self.idle.lock().iter().cloned().collect();
        let checks = candidates
            .iter()
            .map(|conn| self.validator.validate(conn.connection().as_ref()));
        let outcomes = futures::future::join_all(checks).await;
        let failed: HashSet<u64> = candidates
            .iter()
            .zip(outcomes)
            .filter(|(_, valid)| !valid)
            .map(|(conn, _)| conn.id())
            .collect();
        if !failed.is_empty() {
            // Only evict what is still idle; anything lent meanwhile is its borrower's now.
            let mut evicted = Vec::new();
            self.idle.lock().retain(|conn| {
                if failed.contains(&conn.id()) {
                    evicted.push(conn.clone());
                    false
                } else {
                    true
                }
            });
            for conn in evicted {
                report.invalid += 1;
                self.counters.record_validation_failure();
                self.discard(&conn, "failed validation while idle").await;
            }
        }

        loop {
            if !self.is_running() {
                break;
            }
            let idle = self.idle.lock().len();
            if idle >= self.config.min_idle() || !self.try_reserve_slot() {
                break;
            }
            match self.open_connection().await {
                Ok(conn) => {
                    self.push_idle(conn);
                    report.created += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "maintenance could not restore min_idle, retrying next pass");
                    break;
                }
            }
        }

        if report != MaintenanceReport::default() {
            tracing::info!(
                lifetime_expired = report.lifetime_expired,
                idle_expired = report.idle_expired,
                invalid = report.invalid,
                created = report.created,
                total = self.all.lock().connections.len(),
                "pool maintenance pass"
            );
        }
        report
    }

    async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.alive.store(false, Ordering::SeqCst);

        let task = self.maintenance.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }

        self.idle.lock().clear();
        let connections: Vec<Arc<PooledConnection>> = {
            let mut all = self.all.lock();
            all.connections.drain().map(|(_, conn)| conn).collect()
        };
        let count = connections.len();
        for conn in connections {
            if conn.try_deactivate() {
                self.active_count.fetch_sub(1, Ordering::SeqCst);
            }
            if let Err(e) = conn.terminate().await {
                tracing::warn!(connection_id = conn.id(), error = %e, "error closing connection during shutdown");
            }
            self.counters.record_closed();
        }

        self.available.notify_waiters();
        tracing::info!(closed = count, "connection pool closed");
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // Dropped without close(): close what is left in the background.
        let connections: Vec<Arc<PooledConnection>> = self
            .all
            .get_mut()
            .connections
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        if connections.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for conn in connections {
                        let _ = conn.terminate().await;
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    count = connections.len(),
                    "connection pool dropped outside a runtime without close()"
                );
            }
        }
    }
}

//! Test fixtures: an in-memory backend and pool helpers.
//!
//! [`MemoryDatabase`] stands in for a server. Each [`MemoryConnection`] is a
//! session against it: `INSERT <row>` statements are applied immediately in
//! autocommit mode and buffered inside a transaction until `COMMIT`. This is
//! enough to observe whether the pool and manager commit, roll back and
//! release sessions correctly.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dbpool_tests::fixtures::{test_pool, test_pool_config};
//!
//! let (pool, db) = test_pool(test_pool_config(1, 0, 4)).await?;
//! let conn = pool.get_connection().await?;
//! conn.execute("INSERT alice").await?;
//! assert_eq!(db.committed_rows(), vec!["alice"]);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dbpool_connection::{ConnectionFactory, ConnectionPool, PoolConfig};
use dbpool_core::{Connection, ConnectionTarget, DbPoolError, StatementResult};
use parking_lot::Mutex;

/// Shared server-side state for every session
#[derive(Default)]
pub struct MemoryDatabase {
    committed: Mutex<Vec<String>>,
    sessions_opened: AtomicU64,
    open_sessions: AtomicUsize,
    peak_open_sessions: AtomicUsize,
    refuse_connections: AtomicBool,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rows visible outside any transaction
    pub fn committed_rows(&self) -> Vec<String> {
        self.committed.lock().clone()
    }

    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were open at the same time
    pub fn peak_open_sessions(&self) -> usize {
        self.peak_open_sessions.load(Ordering::SeqCst)
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    fn open_session(&self) -> u64 {
        let open = self.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_open_sessions.fetch_max(open, Ordering::SeqCst);
        self.sessions_opened.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn close_session(&self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }

    fn apply(&self, rows: impl IntoIterator<Item = String>) {
        self.committed.lock().extend(rows);
    }
}

#[derive(Default)]
struct SessionState {
    auto_commit: bool,
    in_transaction: bool,
    pending: Vec<String>,
}

/// One session against a [`MemoryDatabase`]
pub struct MemoryConnection {
    session_id: u64,
    db: Arc<MemoryDatabase>,
    state: Mutex<SessionState>,
    closed: AtomicBool,
    broken: AtomicBool,
}

impl MemoryConnection {
    fn new(db: Arc<MemoryDatabase>) -> Self {
        Self {
            session_id: db.open_session(),
            db,
            state: Mutex::new(SessionState {
                auto_commit: true,
                ..Default::default()
            }),
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Simulate a dropped network link: validation and statements fail
    pub fn break_link(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn driver_name(&self) -> &str {
        "memory"
    }

    async fn execute(&self, sql: &str) -> dbpool_core::Result<StatementResult> {
        if self.is_closed() {
            return Err(DbPoolError::Connection("session closed".into()));
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(DbPoolError::Connection("connection reset by peer".into()));
        }

        let mut state = self.state.lock();
        let statement = sql.trim();
        match statement.split_once(' ').unwrap_or((statement, "")) {
            ("BEGIN", _) => state.in_transaction = true,
            ("COMMIT", _) => {
                let rows = std::mem::take(&mut state.pending);
                state.in_transaction = false;
                self.db.apply(rows);
            }
            ("ROLLBACK", _) => {
                state.pending.clear();
                state.in_transaction = false;
            }
            ("INSERT", row) => {
                if state.auto_commit && !state.in_transaction {
                    self.db.apply([row.to_string()]);
                } else {
                    state.pending.push(row.to_string());
                }
                return Ok(StatementResult::new(1));
            }
            ("SELECT", _) | ("SET", _) => {}
            _ => {
                return Err(DbPoolError::Query(format!(
                    "unsupported statement: {}",
                    statement
                )));
            }
        }
        Ok(StatementResult::new(0))
    }

    async fn is_valid(&self) -> bool {
        !self.is_closed() && !self.broken.load(Ordering::SeqCst)
    }

    async fn set_auto_commit(&self, enabled: bool) -> dbpool_core::Result<()> {
        if self.is_closed() {
            return Err(DbPoolError::Connection("session closed".into()));
        }
        let mut state = self.state.lock();
        if enabled && !state.auto_commit {
            // Switching autocommit back on commits pending work
            let rows = std::mem::take(&mut state.pending);
            state.in_transaction = false;
            self.db.apply(rows);
        }
        state.auto_commit = enabled;
        Ok(())
    }

    async fn close(&self) -> dbpool_core::Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.close_session();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Opens [`MemoryConnection`]s, remembering each one
pub struct MemoryConnectionFactory {
    db: Arc<MemoryDatabase>,
    connect_delay: Duration,
    sessions: Mutex<Vec<Arc<MemoryConnection>>>,
}

impl MemoryConnectionFactory {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self {
            db,
            connect_delay: Duration::ZERO,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Make every connect take this long, like a real handshake
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Every session opened so far, in order
    pub fn sessions(&self) -> Vec<Arc<MemoryConnection>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn create(&self, _target: &ConnectionTarget) -> dbpool_core::Result<Arc<dyn Connection>> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.db.refuse_connections.load(Ordering::SeqCst) {
            return Err(DbPoolError::Connection("connection refused".into()));
        }
        let conn = Arc::new(MemoryConnection::new(self.db.clone()));
        self.sessions.lock().push(conn.clone());
        Ok(conn)
    }
}

pub fn test_target() -> ConnectionTarget {
    ConnectionTarget::new("memory", "memory://test")
}

/// Pool configuration with short timeouts and maintenance left to the test
pub fn test_pool_config(initial: usize, min_idle: usize, max: usize) -> PoolConfig {
    PoolConfig::new(test_target())
        .with_sizes(initial, min_idle, max)
        .with_max_wait_ms(100)
        .with_validation_timeout_ms(50)
        .with_maintenance_interval_ms(3_600_000)
}

/// Start a pool over a fresh in-memory database
pub async fn test_pool(config: PoolConfig) -> Result<(ConnectionPool, Arc<MemoryDatabase>)> {
    initialize_logging();
    let db = MemoryDatabase::new();
    let pool = ConnectionPool::new(config, MemoryConnectionFactory::new(db.clone()))
        .await
        .context("failed to start test pool")?;
    Ok((pool, db))
}

/// Install a test-writer subscriber once per process; `RUST_LOG` refines it.
pub fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        for directive in ["dbpool_connection=debug", "dbpool_tests=debug"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

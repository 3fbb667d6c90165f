//! Mock backend shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dbpool_core::{
    Connection, ConnectionTarget, DbPoolError, IsolationLevel, Result, StatementResult,
};
use parking_lot::Mutex;

use crate::pool::{ConnectionFactory, PoolConfig};

/// Mock connection that records every statement it sees
pub(crate) struct MockConnection {
    pub(crate) id: usize,
    closed: AtomicBool,
    valid: AtomicBool,
    fail_statements: AtomicBool,
    auto_commit: AtomicBool,
    close_calls: AtomicUsize,
    statement_delay: Mutex<Duration>,
    isolation: Mutex<Option<IsolationLevel>>,
    statements: Mutex<Vec<String>>,
}

impl MockConnection {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            fail_statements: AtomicBool::new(false),
            auto_commit: AtomicBool::new(true),
            close_calls: AtomicUsize::new(0),
            statement_delay: Mutex::new(Duration::ZERO),
            isolation: Mutex::new(None),
            statements: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_statements(&self, fail: bool) {
        self.fail_statements.store(fail, Ordering::SeqCst);
    }

    /// Make every statement, the validation query included, take this long
    pub(crate) fn set_statement_delay(&self, delay: Duration) {
        *self.statement_delay.lock() = delay;
    }

    pub(crate) fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str) -> Result<StatementResult> {
        let delay = *self.statement_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.is_closed() {
            return Err(DbPoolError::Connection("mock connection closed".into()));
        }
        if self.fail_statements.load(Ordering::SeqCst) {
            return Err(DbPoolError::Query(format!("mock failure: {}", sql)));
        }
        self.statements.lock().push(sql.to_string());
        Ok(StatementResult::new(1))
    }

    async fn is_valid(&self) -> bool {
        !self.is_closed() && self.valid.load(Ordering::SeqCst)
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        self.auto_commit.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    async fn isolation_level(&self) -> Result<IsolationLevel> {
        let level = *self.isolation.lock();
        Ok(level.unwrap_or(IsolationLevel::ReadCommitted))
    }

    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        *self.isolation.lock() = Some(level);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock factory that counts and remembers every connection it opens
pub(crate) struct MockConnectionFactory {
    counter: AtomicUsize,
    should_fail: AtomicBool,
    created: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnectionFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicUsize::new(0),
            should_fail: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    pub(crate) fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn connection(&self, id: usize) -> Arc<MockConnection> {
        self.created
            .lock()
            .iter()
            .find(|conn| conn.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no mock connection with id {}", id))
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(&self, _target: &ConnectionTarget) -> Result<Arc<dyn Connection>> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(DbPoolError::Connection("connection refused".into()));
        }
        // Ids start at 1 to line up with pool-assigned ids in sequential tests.
        let id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let conn = Arc::new(MockConnection::new(id));
        self.created.lock().push(conn.clone());
        Ok(conn)
    }
}

/// Small pool sizes and short timeouts for tests
pub(crate) fn test_config(initial: usize, min_idle: usize, max: usize) -> PoolConfig {
    PoolConfig::new(ConnectionTarget::new("mock", "mock://local"))
        .with_sizes(initial, min_idle, max)
        .with_max_wait_ms(100)
        .with_validation_timeout_ms(50)
        // Keep the background pass out of the way; tests drive it by hand.
        .with_maintenance_interval_ms(Duration::from_secs(3600).as_millis() as u64)
}

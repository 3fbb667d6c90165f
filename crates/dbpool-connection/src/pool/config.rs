//! Pool configuration types

use std::time::Duration;

use dbpool_core::{ConnectionTarget, DbPoolError, IsolationLevel, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a connection pool
///
/// Controls pool sizing, timeouts, validation and connection lifecycle.
/// Build it with [`PoolConfig::new`] and the `with_*` setters, or
/// deserialize it; either way [`PoolConfig::validate`] runs when the pool
/// is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Where connections are opened
    target: ConnectionTarget,
    /// Connections created when the pool starts
    initial_size: usize,
    /// Maximum number of connections allowed in the pool
    max_size: usize,
    /// Idle connections the maintenance pass keeps available
    min_idle: usize,
    /// Timeout in milliseconds when borrowing a connection
    max_wait_ms: u64,
    /// Time budget in milliseconds for a single validation check
    validation_timeout_ms: u64,
    /// Timeout in milliseconds before an idle connection is evicted
    idle_timeout_ms: u64,
    /// Maximum lifetime of a connection in milliseconds
    max_lifetime_ms: u64,
    /// Validate connections before handing them out
    test_on_borrow: bool,
    /// Validate connections when they are returned
    test_on_return: bool,
    /// Statement used to validate a connection (empty disables it)
    validation_query: String,
    /// Isolation level applied to every new connection
    default_isolation_level: Option<IsolationLevel>,
    /// Interval in milliseconds between maintenance passes
    maintenance_interval_ms: u64,
}

impl PoolConfig {
    /// Create a configuration for the given target with default settings
    pub fn new(target: ConnectionTarget) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    /// Set the initial, minimum idle and maximum pool sizes
    pub fn with_sizes(mut self, initial_size: usize, min_idle: usize, max_size: usize) -> Self {
        self.initial_size = initial_size;
        self.min_idle = min_idle;
        self.max_size = max_size;
        self
    }

    /// Set the borrow timeout in milliseconds
    pub fn with_max_wait_ms(mut self, timeout_ms: u64) -> Self {
        self.max_wait_ms = timeout_ms;
        self
    }

    /// Set the validation timeout in milliseconds
    pub fn with_validation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.validation_timeout_ms = timeout_ms;
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set the maximum connection lifetime in milliseconds
    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = lifetime_ms;
        self
    }

    pub fn with_test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    pub fn with_test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }

    /// Set the validation statement; an empty string skips the statement
    /// and relies on the driver's own liveness check
    pub fn with_validation_query(mut self, query: impl Into<String>) -> Self {
        self.validation_query = query.into();
        self
    }

    pub fn with_default_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.default_isolation_level = Some(level);
        self
    }

    /// Set the interval between maintenance passes in milliseconds
    pub fn with_maintenance_interval_ms(mut self, interval_ms: u64) -> Self {
        self.maintenance_interval_ms = interval_ms;
        self
    }

    /// Check the sizing invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(DbPoolError::Configuration(
                "max_size must be greater than 0".into(),
            ));
        }
        if self.min_idle > self.max_size {
            return Err(DbPoolError::Configuration(format!(
                "min_idle ({}) cannot exceed max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.initial_size > self.max_size {
            return Err(DbPoolError::Configuration(format!(
                "initial_size ({}) cannot exceed max_size ({})",
                self.initial_size, self.max_size
            )));
        }
        if self.maintenance_interval_ms == 0 {
            return Err(DbPoolError::Configuration(
                "maintenance_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn min_idle(&self) -> usize {
        self.min_idle
    }

    /// Get the borrow timeout as a Duration
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Get the validation timeout as a Duration
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    /// Get the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Get the maximum lifetime as a Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    pub fn test_on_borrow(&self) -> bool {
        self.test_on_borrow
    }

    pub fn test_on_return(&self) -> bool {
        self.test_on_return
    }

    /// Get the validation statement, if one is configured
    pub fn validation_query(&self) -> Option<&str> {
        let query = self.validation_query.trim();
        (!query.is_empty()).then_some(query)
    }

    pub fn default_isolation_level(&self) -> Option<IsolationLevel> {
        self.default_isolation_level
    }

    /// Get the maintenance interval as a Duration
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - initial_size: 5, min_idle: 3, max_size: 20
    /// - max_wait: 5 seconds
    /// - validation_timeout: 5 seconds
    /// - idle_timeout: 5 minutes
    /// - max_lifetime: 30 minutes
    /// - test_on_borrow: true, test_on_return: false
    /// - validation_query: "SELECT 1"
    /// - maintenance_interval: 30 seconds
    fn default() -> Self {
        Self {
            target: ConnectionTarget::default(),
            initial_size: 5,
            max_size: 20,
            min_idle: 3,
            max_wait_ms: 5_000,
            validation_timeout_ms: 5_000,
            idle_timeout_ms: 300_000,
            max_lifetime_ms: 1_800_000,
            test_on_borrow: true,
            test_on_return: false,
            validation_query: "SELECT 1".to_string(),
            default_isolation_level: None,
            maintenance_interval_ms: 30_000,
        }
    }
}

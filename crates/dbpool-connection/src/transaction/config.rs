//! Transaction manager configuration

use std::time::Duration;

use dbpool_core::{DbPoolError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a [`TransactionManager`](super::TransactionManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Idle time in milliseconds after which a transaction is rolled back
    pub timeout_ms: u64,
    /// Interval in milliseconds between cleanup passes
    pub cleanup_interval_ms: u64,
}

impl TransactionConfig {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_cleanup_interval_ms(mut self, interval_ms: u64) -> Self {
        self.cleanup_interval_ms = interval_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(DbPoolError::Configuration(
                "transaction timeout_ms must be greater than 0".into(),
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(DbPoolError::Configuration(
                "cleanup_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TransactionConfig {
    /// Transactions time out after 60 seconds idle; cleanup runs every 5
    /// seconds.
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            cleanup_interval_ms: 5_000,
        }
    }
}

//! Pool statistics types

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Statistics about a connection pool's current state
///
/// Provides insight into pool utilization and health. The gauges
/// (`total`, `idle`, `active`, `waiting`) are read one after another
/// without a global lock, so under load they are approximate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total number of connections (idle + active)
    pub total: usize,
    /// Number of idle connections available in the pool
    pub idle: usize,
    /// Number of connections currently in use
    pub active: usize,
    /// Number of borrowers waiting for a connection
    pub waiting: usize,
    /// Connections opened since the pool started
    pub created: u64,
    /// Connections closed since the pool started
    pub closed: u64,
    /// Validation checks that failed
    pub validation_failures: u64,
    /// Borrows that timed out
    pub exhausted: u64,
}

impl PoolStats {
    /// Calculate pool utilization as a percentage (0.0 to 1.0)
    ///
    /// Returns 0.0 if total is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.active as f64 / self.total as f64
        }
    }

    /// Check if the pool is fully utilized (all connections in use)
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.total > 0
    }
}

/// Cumulative lifecycle counters
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    created: AtomicU64,
    closed: AtomicU64,
    validation_failures: AtomicU64,
    exhausted: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fill(&self, stats: &mut PoolStats) {
        stats.created = self.created.load(Ordering::Relaxed);
        stats.closed = self.closed.load(Ordering::Relaxed);
        stats.validation_failures = self.validation_failures.load(Ordering::Relaxed);
        stats.exhausted = self.exhausted.load(Ordering::Relaxed);
    }
}

//! Per-transaction state

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dbpool_core::{DbPoolError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::pool::PooledConnection;

/// An open transaction and the connection it runs on
pub struct TransactionContext {
    transaction_id: String,
    connection: Arc<PooledConnection>,
    created_at: Instant,
    started_at: DateTime<Utc>,
    last_access_at: Mutex<Instant>,
    active: AtomicBool,
}

impl TransactionContext {
    pub(crate) fn new(transaction_id: String, connection: Arc<PooledConnection>) -> Self {
        let now = Instant::now();
        Self {
            transaction_id,
            connection,
            created_at: now,
            started_at: Utc::now(),
            last_access_at: Mutex::new(now),
            active: AtomicBool::new(true),
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn connection(&self) -> &Arc<PooledConnection> {
        &self.connection
    }

    /// Wall-clock time the transaction began
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the transaction's connection was last fetched
    pub fn idle_for(&self) -> Duration {
        self.last_access_at.lock().elapsed()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn touch(&self) {
        *self.last_access_at.lock() = Instant::now();
    }

    /// Move the context to its terminal state. Only the first call succeeds.
    pub(crate) fn finish(&self) -> Result<()> {
        if self.active.swap(false, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DbPoolError::TransactionAlreadyTerminal(
                self.transaction_id.clone(),
            ))
        }
    }

    pub fn info(&self) -> TransactionInfo {
        TransactionInfo {
            transaction_id: self.transaction_id.clone(),
            started_at: self.started_at,
            age: self.age(),
            idle_for: self.idle_for(),
        }
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("transaction_id", &self.transaction_id)
            .field("connection_id", &self.connection.id())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of an open transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub transaction_id: String,
    pub started_at: DateTime<Utc>,
    pub age: Duration,
    pub idle_for: Duration,
}

//! Connection pooling and shared transactions for dbpool
//!
//! This crate provides:
//! - [`ConnectionPool`]: a bounded pool with borrow timeouts, validation and
//!   background eviction
//! - [`PooledConnection`]: the proxy handed to callers; closing it returns it
//!   to the pool
//! - [`TransactionManager`]: transactions identified by id that several
//!   workers can drive, with timeout cleanup
//! - [`DbPoolSettings`]: TOML-backed configuration for both

pub mod health;
pub mod pool;
mod scheduler;
mod settings;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use health::ConnectionValidator;
pub use pool::{
    ConnectionFactory, ConnectionPool, ExpiryReason, MaintenanceReport, PoolConfig, PoolStats,
    PooledConnection,
};
pub use settings::DbPoolSettings;
pub use transaction::{TransactionConfig, TransactionContext, TransactionInfo, TransactionManager};

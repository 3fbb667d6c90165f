//! Connection pooling for database connections
//!
//! This module provides a bounded connection pool with borrow timeouts,
//! validation, background eviction and statistics tracking.
//!
//! # Example
//!
//! ```ignore
//! use dbpool_connection::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(target)
//!     .with_sizes(5, 3, 20)
//!     .with_max_wait_ms(5000)
//!     .with_idle_timeout_ms(300000);
//!
//! let pool = ConnectionPool::new(config, connection_factory).await?;
//! let conn = pool.get_connection().await?;
//! conn.execute("UPDATE counters SET hits = hits + 1").await?;
//! // Hand the connection back
//! conn.close().await?;
//! ```

mod config;
#[allow(clippy::module_inception)]
mod pool;
mod pooled;
mod stats;


pub use config::PoolConfig;
pub use pool::{ConnectionFactory, ConnectionPool, MaintenanceReport};
pub use pooled::{ExpiryReason, PooledConnection};
pub use stats::PoolStats;

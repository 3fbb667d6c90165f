//! Shared transactions over pooled connections
//!
//! A [`TransactionManager`] borrows a connection from a
//! [`ConnectionPool`](crate::pool::ConnectionPool), opens a transaction on it
//! and hands back an opaque id. Any worker holding the id can fetch the
//! connection and run statements until someone commits or rolls back.
//! Transactions left untouched for longer than the configured timeout are
//! rolled back by a background cleanup pass.
//!
//! # Example
//!
//! ```ignore
//! use dbpool_connection::transaction::TransactionManager;
//!
//! let manager = TransactionManager::new(pool.clone());
//! let id = manager.begin_transaction().await?;
//!
//! let conn = manager.get_transaction_connection(&id).await?;
//! conn.execute("INSERT INTO audit (event) VALUES ('login')").await?;
//!
//! manager.commit_transaction(&id).await?;
//! ```

mod config;
mod context;
mod manager;
mod registry;


pub use config::TransactionConfig;
pub use context::{TransactionContext, TransactionInfo};
pub use manager::TransactionManager;

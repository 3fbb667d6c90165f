//! dbpool Core - Core abstractions shared by the pool and transaction manager
//!
//! This crate provides the fundamental traits and types that the other
//! dbpool crates depend on. It defines:
//!
//! - `Connection` - Trait every backend driver implements for a live session
//! - `ConnectionTarget` - Opaque descriptor of where and as whom to connect
//! - `IsolationLevel` - Transaction isolation levels
//! - `DbPoolError` - Error type shared across the workspace

mod connection;
mod error;
mod target;
mod types;

pub use connection::*;
pub use error::*;
pub use target::*;
pub use types::*;

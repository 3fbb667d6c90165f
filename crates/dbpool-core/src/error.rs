//! Error types for dbpool

use thiserror::Error;

/// Core error type for pool and transaction operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbPoolError {
    /// No connection became available within the borrow timeout
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    /// The backend refused or could not be reached while opening a connection
    #[error("Connection creation failed: {0}")]
    ConnectionCreationFailed(String),

    /// A connection failed its validation check
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The pool has been closed
    #[error("Connection pool is closed")]
    PoolClosed,

    /// The transaction id is unknown or already resolved
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// The transaction was already committed, rolled back or timed out
    #[error("Transaction already terminal: {0}")]
    TransactionAlreadyTerminal(String),

    /// The transaction manager has been closed
    #[error("Transaction manager is closed")]
    TransactionManagerClosed,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// Payload-free classification of a [`DbPoolError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PoolExhausted,
    ConnectionCreationFailed,
    ValidationFailed,
    PoolClosed,
    TransactionNotFound,
    TransactionAlreadyTerminal,
    TransactionManagerClosed,
    Connection,
    Query,
    Configuration,
    NotSupported,
}

impl DbPoolError {
    /// Get the kind of this error, for matching without inspecting messages
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbPoolError::PoolExhausted(_) => ErrorKind::PoolExhausted,
            DbPoolError::ConnectionCreationFailed(_) => ErrorKind::ConnectionCreationFailed,
            DbPoolError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            DbPoolError::PoolClosed => ErrorKind::PoolClosed,
            DbPoolError::TransactionNotFound(_) => ErrorKind::TransactionNotFound,
            DbPoolError::TransactionAlreadyTerminal(_) => ErrorKind::TransactionAlreadyTerminal,
            DbPoolError::TransactionManagerClosed => ErrorKind::TransactionManagerClosed,
            DbPoolError::Connection(_) => ErrorKind::Connection,
            DbPoolError::Query(_) => ErrorKind::Query,
            DbPoolError::Configuration(_) => ErrorKind::Configuration,
            DbPoolError::NotSupported(_) => ErrorKind::NotSupported,
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DbPoolError::PoolExhausted(_)
                | DbPoolError::ConnectionCreationFailed(_)
                | DbPoolError::Connection(_)
        )
    }
}

/// Result type alias for dbpool operations
pub type Result<T> = std::result::Result<T, DbPoolError>;

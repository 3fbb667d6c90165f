//! Connection trait and transaction control

use crate::{DbPoolError, IsolationLevel, Result, StatementResult};
use async_trait::async_trait;

/// A live database session.
///
/// Drivers implement this for their backend. The pool and the transaction
/// manager only ever talk to a backend through this trait, so they never
/// know which database sits behind it.
///
/// Transaction control follows the autocommit model: while autocommit is
/// enabled every statement commits on its own; after
/// `set_auto_commit(false)` statements accumulate until `commit` or
/// `rollback` resolves them.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "postgresql", "mysql")
    fn driver_name(&self) -> &str;

    /// Execute a statement
    async fn execute(&self, sql: &str) -> Result<StatementResult>;

    /// Check whether the session is still usable.
    ///
    /// Default implementation only checks the closed flag; drivers with a
    /// cheap protocol-level ping should override it.
    async fn is_valid(&self) -> bool {
        !self.is_closed()
    }

    /// Begin an explicit transaction
    async fn begin_transaction(&self) -> Result<()> {
        self.execute("BEGIN").await.map(|_| ())
    }

    /// Commit the current transaction
    async fn commit(&self) -> Result<()> {
        self.execute("COMMIT").await.map(|_| ())
    }

    /// Rollback the current transaction
    async fn rollback(&self) -> Result<()> {
        self.execute("ROLLBACK").await.map(|_| ())
    }

    /// Enable or disable autocommit
    async fn set_auto_commit(&self, enabled: bool) -> Result<()>;

    /// Get the session's transaction isolation level
    async fn isolation_level(&self) -> Result<IsolationLevel> {
        Err(DbPoolError::NotSupported(format!(
            "{} does not report its isolation level",
            self.driver_name()
        )))
    }

    /// Set the session's transaction isolation level
    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        tracing::debug!(driver = self.driver_name(), level = %level, "setting isolation level");
        let sql = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
        self.execute(&sql).await.map(|_| ())
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingConnection {
        statements: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Connection for RecordingConnection {
        fn driver_name(&self) -> &str {
            "recording"
        }

        async fn execute(&self, sql: &str) -> Result<StatementResult> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(StatementResult::default())
        }

        async fn set_auto_commit(&self, _enabled: bool) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_default_transaction_statements() {
        let conn = RecordingConnection::default();
        conn.begin_transaction().await.unwrap();
        conn.set_isolation_level(IsolationLevel::Serializable)
            .await
            .unwrap();
        conn.commit().await.unwrap();
        conn.rollback().await.unwrap();

        let statements = conn.statements.lock().unwrap().clone();
        assert_eq!(
            statements,
            vec![
                "BEGIN",
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
                "COMMIT",
                "ROLLBACK"
            ]
        );
    }

    #[tokio::test]
    async fn test_default_is_valid_tracks_closed_flag() {
        let conn = RecordingConnection::default();
        assert!(conn.is_valid().await);
        conn.close().await.unwrap();
        assert!(!conn.is_valid().await);
    }

    #[tokio::test]
    async fn test_default_isolation_level_not_supported() {
        let conn = RecordingConnection::default();
        let err = conn.isolation_level().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotSupported);
    }
}

//! Connection validation
//!
//! Checks that a connection is alive by asking the driver and then running
//! the configured validation statement, all within a time budget.

use std::time::{Duration, Instant};

use dbpool_core::{Connection, DbPoolError, Result};

use crate::pool::PoolConfig;

/// Validates connections for the pool.
#[derive(Debug, Clone)]
pub struct ConnectionValidator {
    timeout: Duration,
    query: Option<String>,
}

impl ConnectionValidator {
    /// Create a validator with the given time budget and statement
    pub fn new(timeout: Duration, query: Option<String>) -> Self {
        Self { timeout, query }
    }

    /// Create a validator from a pool configuration
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(
            config.validation_timeout(),
            config.validation_query().map(str::to_string),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Check a connection and report the round-trip time.
    ///
    /// # Returns
    ///
    /// * `Ok(Duration)` - How long the check took
    /// * `Err(DbPoolError::ValidationFailed)` - If the connection is closed,
    ///   the driver reports it invalid, the statement fails, or the check
    ///   runs out of time
    pub async fn check(&self, conn: &dyn Connection) -> Result<Duration> {
        if conn.is_closed() {
            return Err(DbPoolError::ValidationFailed("connection is closed".into()));
        }

        let start = Instant::now();
        let ping = async {
            if !conn.is_valid().await {
                return Err(DbPoolError::ValidationFailed(
                    "driver reported the connection invalid".into(),
                ));
            }
            if let Some(query) = &self.query {
                conn.execute(query)
                    .await
                    .map_err(|e| DbPoolError::ValidationFailed(e.to_string()))?;
            }
            Ok(())
        };

        match tokio::time::timeout(self.timeout, ping).await {
            Ok(Ok(())) => Ok(start.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DbPoolError::ValidationFailed(format!(
                "validation timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Check a connection, collapsing the outcome to a boolean
    pub async fn validate(&self, conn: &dyn Connection) -> bool {
        match self.check(conn).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(driver = conn.driver_name(), error = %e, "connection failed validation");
                false
            }
        }
    }
}

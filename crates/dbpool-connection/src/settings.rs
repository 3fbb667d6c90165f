//! File-backed settings for a pool and its transaction manager
//!
//! ```toml
//! [pool]
//! max_size = 10
//! min_idle = 2
//! max_wait_ms = 2000
//!
//! [pool.target]
//! driver = "postgres"
//! url = "postgres://localhost/app"
//!
//! [transactions]
//! timeout_ms = 30000
//! ```

use dbpool_core::{DbPoolError, Result};
use serde::{Deserialize, Serialize};

use crate::pool::PoolConfig;
use crate::transaction::TransactionConfig;

/// Combined pool and transaction settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbPoolSettings {
    pub pool: PoolConfig,
    pub transactions: TransactionConfig,
}

impl DbPoolSettings {
    /// Parse settings from a TOML document and validate them.
    ///
    /// Missing sections and keys fall back to their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let settings: Self = toml::from_str(source)
            .map_err(|e| DbPoolError::Configuration(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render the settings back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DbPoolError::Configuration(format!("cannot serialize settings: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.transactions.validate()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dbpool_core::IsolationLevel;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = DbPoolSettings::from_toml_str("").unwrap();
        assert_eq!(settings, DbPoolSettings::default());
    }

    #[test]
    fn test_parse_full_document() {
        let settings = DbPoolSettings::from_toml_str(indoc! {r#"
            [pool]
            initial_size = 2
            min_idle = 1
            max_size = 8
            max_wait_ms = 250
            test_on_return = true
            validation_query = "SELECT 42"
            default_isolation_level = "repeatable_read"

            [pool.target]
            driver = "postgres"
            url = "postgres://localhost/app"

            [pool.target.options]
            sslmode = "disable"

            [transactions]
            timeout_ms = 30000
            cleanup_interval_ms = 1000
        "#})
        .unwrap();

        let pool = &settings.pool;
        assert_eq!(pool.target().driver, "postgres");
        assert_eq!(pool.target().url, "postgres://localhost/app");
        assert_eq!(pool.target().option("sslmode"), Some("disable"));
        assert_eq!(pool.initial_size(), 2);
        assert_eq!(pool.min_idle(), 1);
        assert_eq!(pool.max_size(), 8);
        assert_eq!(pool.max_wait(), Duration::from_millis(250));
        assert!(pool.test_on_return());
        assert_eq!(pool.validation_query(), Some("SELECT 42"));
        assert_eq!(
            pool.default_isolation_level(),
            Some(IsolationLevel::RepeatableRead)
        );
        // Unset keys keep their defaults
        assert_eq!(pool.idle_timeout(), Duration::from_secs(300));

        assert_eq!(settings.transactions.timeout(), Duration::from_secs(30));
        assert_eq!(
            settings.transactions.cleanup_interval(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        let result = DbPoolSettings::from_toml_str(indoc! {r#"
            [pool]
            min_idle = 10
            max_size = 4
        "#});
        assert!(matches!(result, Err(DbPoolError::Configuration(_))));
    }

    #[test]
    fn test_malformed_document_rejected() {
        let result = DbPoolSettings::from_toml_str("[pool\nmax_size = ");
        assert!(matches!(result, Err(DbPoolError::Configuration(_))));

        let wrong_type = DbPoolSettings::from_toml_str("[pool]\nmax_size = \"ten\"");
        assert!(matches!(wrong_type, Err(DbPoolError::Configuration(_))));
    }

    #[test]
    fn test_toml_output_parses_back() {
        let settings = DbPoolSettings::from_toml_str(indoc! {r#"
            [pool]
            max_size = 3
            min_idle = 1
            initial_size = 1
        "#})
        .unwrap();

        let rendered = settings.to_toml_string().unwrap();
        assert_eq!(DbPoolSettings::from_toml_str(&rendered).unwrap(), settings);
    }
}

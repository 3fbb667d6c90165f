//! Connection target descriptor

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where and as whom a connection should be opened.
///
/// Every field is opaque to the pool: drivers interpret the url and
/// options however their backend requires.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionTarget {
    /// Driver ID (e.g., "postgres", "mysql", "sqlite")
    pub driver: String,
    /// Backend url or connection string
    pub url: String,
    /// Username
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Additional driver options
    pub options: HashMap<String, String>,
}

impl ConnectionTarget {
    pub fn new(driver: &str, url: &str) -> Self {
        Self {
            driver: driver.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Set the credentials used to authenticate
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Add a driver option
    pub fn with_option(mut self, key: &str, value: impl Into<String>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Get a driver option
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

// Passwords never reach logs through `{:?}`.
impl std::fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("options", &self.options)
            .finish()
    }
}

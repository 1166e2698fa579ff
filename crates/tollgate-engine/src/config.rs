//! Engine and backend configuration.
//!
//! ## Configuration
//!
//! - `TOLLGATE_CONFIG_DIR`: Directory of dataset documents (default: `config/datasets`)
//! - `TOLLGATE_CLICKHOUSE_URL`: ClickHouse HTTP interface (default: `http://localhost:8123`)
//! - `TOLLGATE_CLICKHOUSE_USER`: ClickHouse user (default: `default`)
//! - `TOLLGATE_CLICKHOUSE_PASSWORD`: ClickHouse password (optional)
//! - `TOLLGATE_CLICKHOUSE_DATABASE`: Database the dataset tables live in (default: `default`)
//! - `TOLLGATE_CLICKHOUSE_TIMEOUT_SECS`: Request timeout (default: 30)

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tollgate_policy::PolicyStoreConfig;

use crate::error::BackendError;

const DEFAULT_CONFIG_DIR: &str = "config/datasets";
const DEFAULT_CLICKHOUSE_URL: &str = "http://localhost:8123";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Connection settings for the ClickHouse HTTP interface.
///
/// # Security
///
/// The `Debug` implementation masks the password to prevent accidental exposure
/// in logs.
#[derive(Clone)]
pub struct ClickhouseConfig {
    pub url: String,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub timeout: Duration,
}

impl Default for ClickhouseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CLICKHOUSE_URL.to_string(),
            user: "default".to_string(),
            password: None,
            database: "default".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for ClickhouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickhouseConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClickhouseConfig {
    /// Minimum allowed timeout value.
    pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);

    pub fn builder(url: impl Into<String>) -> ClickhouseConfigBuilder {
        ClickhouseConfigBuilder::new(url)
    }

    /// Read `TOLLGATE_CLICKHOUSE_*`, falling back to defaults
    pub fn from_env() -> Result<Self, BackendError> {
        let mut builder = Self::builder(
            env_string("TOLLGATE_CLICKHOUSE_URL").unwrap_or_else(|| DEFAULT_CLICKHOUSE_URL.into()),
        );
        if let Some(user) = env_string("TOLLGATE_CLICKHOUSE_USER") {
            builder = builder.user(user);
        }
        if let Some(password) = env_string("TOLLGATE_CLICKHOUSE_PASSWORD") {
            builder = builder.password(password);
        }
        if let Some(database) = env_string("TOLLGATE_CLICKHOUSE_DATABASE") {
            builder = builder.database(database);
        }
        if let Some(secs) = env_string("TOLLGATE_CLICKHOUSE_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder.build()
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        if self.url.is_empty() {
            return Err(BackendError::Config("url cannot be empty".to_string()));
        }
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| BackendError::Config(format!("Invalid url: {}", e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(BackendError::Config(format!(
                "url must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.database.is_empty() {
            return Err(BackendError::Config("database cannot be empty".to_string()));
        }

        if self.timeout < Self::MIN_TIMEOUT {
            return Err(BackendError::Config(format!(
                "timeout ({:?}) must be >= {:?}",
                self.timeout,
                Self::MIN_TIMEOUT
            )));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ClickhouseConfigBuilder {
    config: ClickhouseConfig,
}

impl ClickhouseConfigBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            config: ClickhouseConfig {
                url: url.into(),
                ..Default::default()
            },
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Build the configuration, validating all settings.
    pub fn build(self) -> Result<ClickhouseConfig, BackendError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Process-wide engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub config_dir: PathBuf,
    pub clickhouse: ClickhouseConfig,
    pub policy_store: PolicyStoreConfig,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, BackendError> {
        Ok(Self {
            config_dir: env_string("TOLLGATE_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR)),
            clickhouse: ClickhouseConfig::from_env()?,
            policy_store: PolicyStoreConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClickhouseConfig::default();
        assert_eq!(config.url, DEFAULT_CLICKHOUSE_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ClickhouseConfig::builder("https://clickhouse.internal:8443")
            .user("tollgate")
            .password("secret")
            .database("events")
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(config.user, "tollgate");
        assert_eq!(config.database, "events");
    }

    #[test]
    fn test_invalid_configs() {
        assert!(ClickhouseConfig::builder("").build().is_err());
        assert!(ClickhouseConfig::builder("not a url").build().is_err());
        assert!(ClickhouseConfig::builder("ftp://host").build().is_err());
        assert!(ClickhouseConfig::builder("http://host")
            .timeout(Duration::from_millis(10))
            .build()
            .is_err());
        assert!(ClickhouseConfig::builder("http://host")
            .database("")
            .build()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ClickhouseConfig::builder("http://host")
            .password("hunter2")
            .build()
            .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}

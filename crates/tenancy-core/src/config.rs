//! tenancy.toml configuration parser.
//!
//! ```toml
//! [database]
//! host = "db.internal"
//! user = "crm"
//! database = "crm"
//! schema_template = "tenant_{tenant}"
//!
//! [pool]
//! max_connections = 50
//! idle_timeout = "10m"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::TENANT_PLACEHOLDER;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenancyConfig {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub pool: PoolSection,
}

/// Base connection settings shared by every tenant connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    pub password: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_schema_template")]
    pub schema_template: String,
    pub application_name: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    pub statement_timeout: Option<String>,
}

/// Capacity and eviction tuning for the tenant pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,
    #[serde(default = "default_reap_interval")]
    pub reap_interval: String,
    pub acquire_timeout: Option<String>,
    pub max_queued: Option<usize>,
    /// How long `release_all` waits for busy connections to close.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_schema_template() -> String {
    TENANT_PLACEHOLDER.to_string()
}

fn default_connect_timeout() -> String {
    "5s".to_string()
}

fn default_max_connections() -> usize {
    10
}

fn default_idle_timeout() -> String {
    "300s".to_string()
}

fn default_reap_interval() -> String {
    "30s".to_string()
}

fn default_drain_timeout() -> String {
    "30s".to_string()
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: None,
            database: default_database(),
            schema_template: default_schema_template(),
            application_name: None,
            connect_timeout: default_connect_timeout(),
            statement_timeout: None,
        }
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
            reap_interval: default_reap_interval(),
            acquire_timeout: None,
            max_queued: None,
            drain_timeout: default_drain_timeout(),
        }
    }
}

impl DatabaseSection {
    pub fn connect_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.connect_timeout)
    }

    pub fn statement_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.statement_timeout.as_deref().map(parse_duration).transpose()
    }
}

impl PoolSection {
    pub fn idle_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.idle_timeout)
    }

    pub fn reap_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.reap_interval)
    }

    pub fn acquire_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.acquire_timeout.as_deref().map(parse_duration).transpose()
    }

    pub fn drain_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.drain_timeout)
    }
}

impl TenancyConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a config document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TenancyConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field that the pool would otherwise reject at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_connections must be at least 1".to_string(),
            ));
        }
        if self.database.host.is_empty() {
            return Err(ConfigError::Invalid("database.host is empty".to_string()));
        }
        if self.database.schema_template.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "database.schema_template is empty".to_string(),
            ));
        }

        self.database.connect_timeout()?;
        self.database.statement_timeout()?;
        if self.pool.idle_timeout()?.is_zero() {
            return Err(ConfigError::Invalid(
                "pool.idle_timeout must be non-zero".to_string(),
            ));
        }
        if self.pool.reap_interval()?.is_zero() {
            return Err(ConfigError::Invalid(
                "pool.reap_interval must be non-zero".to_string(),
            ));
        }
        self.pool.acquire_timeout()?;
        self.pool.drain_timeout()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config = TenancyConfig::from_toml_str("").unwrap();
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.schema_template, "{tenant}");
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.pool.idle_timeout().unwrap(), Duration::from_secs(300));
        assert_eq!(config.pool.reap_interval().unwrap(), Duration::from_secs(30));
        assert_eq!(config.pool.acquire_timeout().unwrap(), None);
        assert_eq!(config.pool.max_queued, None);
        assert_eq!(config.pool.drain_timeout().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[database]
host = "db.internal"
port = 6432
user = "crm"
password = "hunter2"
database = "crm"
schema_template = "tenant_{tenant}"
application_name = "crm-api"
connect_timeout = "2s"
statement_timeout = "15s"

[pool]
max_connections = 50
idle_timeout = "10m"
reap_interval = "1m"
acquire_timeout = "750ms"
max_queued = 200
drain_timeout = "5s"
"#;
        let config = TenancyConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.database.port, 6432);
        assert_eq!(config.database.password.as_deref(), Some("hunter2"));
        assert_eq!(config.database.connect_timeout().unwrap(), Duration::from_secs(2));
        assert_eq!(
            config.database.statement_timeout().unwrap(),
            Some(Duration::from_secs(15))
        );
        assert_eq!(config.pool.max_connections, 50);
        assert_eq!(config.pool.idle_timeout().unwrap(), Duration::from_secs(600));
        assert_eq!(
            config.pool.acquire_timeout().unwrap(),
            Some(Duration::from_millis(750))
        );
        assert_eq!(config.pool.max_queued, Some(200));
        assert_eq!(config.pool.drain_timeout().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = TenancyConfig::from_toml_str("[pool]\nmax_connections = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let err = TenancyConfig::from_toml_str("[pool]\nidle_timeout = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration(_)));
    }

    #[test]
    fn test_zero_idle_timeout_rejected() {
        let err = TenancyConfig::from_toml_str("[pool]\nidle_timeout = \"0s\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = TenancyConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("max_connections = 10"));
        let reparsed = TenancyConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed.database.host, config.database.host);
    }
}

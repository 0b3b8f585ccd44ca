//! Pool tuning knobs.

use std::time::Duration;

use tenancy_core::{ConfigError, PoolSection};

/// Configuration for the tenant connection pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum slots (open connections + in-flight inits) across all tenants (default: 10).
    pub max_connections: usize,
    /// Connections untouched for longer than this are closed by the reaper (default: 300s).
    pub idle_timeout: Duration,
    /// How often the reaper sweeps while any connection is open (default: 30s).
    pub reap_interval: Duration,
    /// Upper bound on one `acquire()`, queueing included. `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
    /// Fail with `CapacityExceeded` instead of queueing past this many waiters.
    /// `None` queues without bound.
    pub max_queued: Option<usize>,
    /// How long `release_all` waits for connections still in use to close (default: 30s).
    pub drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            idle_timeout: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
            acquire_timeout: None,
            max_queued: None,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Reject settings the pool cannot run with: no slots, or a reaper
    /// that would tick continuously.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_connections must be at least 1".to_string(),
            ));
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "pool.reap_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<&PoolSection> for PoolConfig {
    type Error = ConfigError;

    fn try_from(section: &PoolSection) -> Result<Self, Self::Error> {
        let config = Self {
            max_connections: section.max_connections,
            idle_timeout: section.idle_timeout()?,
            reap_interval: section.reap_interval()?,
            acquire_timeout: section.acquire_timeout()?,
            max_queued: section.max_queued,
            drain_timeout: section.drain_timeout()?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.reap_interval, Duration::from_secs(30));
        assert_eq!(config.acquire_timeout, None);
        assert_eq!(config.max_queued, None);
    }

    #[test]
    fn pool_config_from_section() {
        let section = PoolSection {
            max_connections: 4,
            idle_timeout: "90s".to_string(),
            reap_interval: "10s".to_string(),
            acquire_timeout: Some("2s".to_string()),
            max_queued: Some(16),
            drain_timeout: "1m".to_string(),
        };
        let config = PoolConfig::try_from(&section).unwrap();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.reap_interval, Duration::from_secs(10));
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.max_queued, Some(16));
        assert_eq!(config.drain_timeout, Duration::from_secs(60));
    }

    #[test]
    fn pool_config_rejects_zero_capacity() {
        let section = PoolSection {
            max_connections: 0,
            ..PoolSection::default()
        };
        assert!(PoolConfig::try_from(&section).is_err());
    }

    #[test]
    fn pool_config_rejects_zero_reap_interval() {
        let config = PoolConfig {
            reap_interval: Duration::ZERO,
            ..PoolConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(PoolConfig::default().validate().is_ok());
    }
}

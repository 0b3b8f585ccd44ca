//! Error types for the tenant connection pool.

use std::time::Duration;

use tenancy_core::TenantId;
use thiserror::Error;

/// Result type alias for pool acquisition.
pub type AcquireResult<T> = Result<T, AcquireError>;

/// Failures opening or using a single tenant connection.
///
/// `Clone` so that one failed initialization can be delivered to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("schema not found: {0}")]
    SchemaMissing(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("query failed: {0}")]
    Query(String),

    #[error("connection closed")]
    Closed,

    #[error("connection setup aborted before completing")]
    Aborted,
}

/// Failures of [`TenantPool::acquire`](crate::TenantPool::acquire).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("tenant {tenant}: {source}")]
    Connection {
        tenant: TenantId,
        #[source]
        source: ConnectionError,
    },

    #[error("acquire for tenant {tenant} timed out after {waited:?}")]
    Timeout { tenant: TenantId, waited: Duration },

    #[error("admission queue full ({queued} waiting), rejected tenant {tenant}")]
    CapacityExceeded { tenant: TenantId, queued: usize },

    #[error("tenant pool is shutting down")]
    ShuttingDown,
}

impl AcquireError {
    pub(crate) fn connection(tenant: &TenantId, source: ConnectionError) -> Self {
        AcquireError::Connection {
            tenant: tenant.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_display() {
        let err = ConnectionError::Connect {
            host: "db.local".to_string(),
            port: 5432,
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to db.local:5432: connection refused"
        );
    }

    #[test]
    fn acquire_error_keeps_source() {
        use std::error::Error as _;

        let err = AcquireError::connection(
            &TenantId::from("acme"),
            ConnectionError::SchemaMissing("acme".to_string()),
        );
        assert_eq!(err.to_string(), "tenant acme: schema not found: acme");
        assert!(err.source().is_some());
    }
}

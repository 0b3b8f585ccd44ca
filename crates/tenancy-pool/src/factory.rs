//! Tenant connection factory seam.

use async_trait::async_trait;
use tenancy_core::TenantId;

use crate::error::ConnectionError;
use crate::handle::TenantConnection;

/// Opens exactly one new connection scoped to a tenant's schema.
///
/// Implementations must not touch pool bookkeeping, and must not leak a
/// partially opened connection: anything opened before a failure is closed
/// before the error is returned.
#[async_trait]
pub trait TenantConnectionFactory: Send + Sync + 'static {
    /// The connection type handed out by the pool.
    type Connection: TenantConnection;

    /// Establish a new connection for the given tenant.
    async fn create(&self, tenant: &TenantId) -> Result<Self::Connection, ConnectionError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::handle::testing::FakeConnection;

    /// Factory handing out [`FakeConnection`]s, failing for selected tenants.
    #[derive(Default)]
    pub struct FakeFactory {
        pub calls: AtomicU64,
        pub failing: Mutex<HashSet<TenantId>>,
    }

    impl FakeFactory {
        pub fn failing_for(tenant: &str) -> Self {
            let factory = Self::default();
            factory
                .failing
                .lock()
                .unwrap()
                .insert(TenantId::from(tenant));
            factory
        }

        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TenantConnectionFactory for FakeFactory {
        type Connection = FakeConnection;

        async fn create(&self, tenant: &TenantId) -> Result<FakeConnection, ConnectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.failing.lock().unwrap().contains(tenant) {
                return Err(ConnectionError::SchemaMissing(tenant.to_string()));
            }
            Ok(FakeConnection::default())
        }
    }
}

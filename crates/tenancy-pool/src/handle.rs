//! Connection handles — one live connection bound to one tenant schema.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tenancy_core::TenantId;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::time::Instant;

use crate::error::ConnectionError;

/// A live database connection already scoped to a tenant schema.
///
/// Implemented by the concrete driver wrapper (see
/// [`PgTenantConnection`](crate::postgres::PgTenantConnection)) and by
/// test doubles.
#[async_trait]
pub trait TenantConnection: Send + fmt::Debug + 'static {
    /// Health-check ping. Returns `true` if the connection is alive.
    async fn ping(&mut self) -> bool;

    /// Close the underlying transport.
    async fn close(self) -> Result<(), ConnectionError>;
}

struct HandleInner<C> {
    id: u64,
    tenant: TenantId,
    opened_at: Instant,
    /// `None` once closed.
    connection: Mutex<Option<C>>,
}

/// Shared handle to a tenant's connection.
///
/// Cloning is cheap; all clones refer to the same underlying connection.
/// The registry keeps one clone for as long as the tenant is resident, and
/// callers receive further clones from `acquire()`. Only the idle reaper
/// and shutdown close it.
pub struct ConnectionHandle<C> {
    inner: Arc<HandleInner<C>>,
}

impl<C> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("tenant", &self.inner.tenant)
            .finish_non_exhaustive()
    }
}

impl<C: TenantConnection> ConnectionHandle<C> {
    pub(crate) fn new(id: u64, tenant: TenantId, connection: C) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                tenant,
                opened_at: Instant::now(),
                connection: Mutex::new(Some(connection)),
            }),
        }
    }

    /// Unique ID of this handle within its pool.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn tenant(&self) -> &TenantId {
        &self.inner.tenant
    }

    pub fn opened_at(&self) -> Instant {
        self.inner.opened_at
    }

    /// Whether two handles share the same underlying connection.
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Exclusive access to the live connection for queries and repositories.
    ///
    /// Callers sharing a handle are serialized here. Fails with
    /// [`ConnectionError::Closed`] once the handle has been closed.
    pub async fn connection(&self) -> Result<MappedMutexGuard<'_, C>, ConnectionError> {
        let guard = self.inner.connection.lock().await;
        MutexGuard::try_map(guard, |conn| conn.as_mut()).map_err(|_| ConnectionError::Closed)
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.connection.lock().await.is_none()
    }

    /// Ping the connection. A closed handle reports unhealthy.
    pub async fn ping(&self) -> bool {
        match self.connection().await {
            Ok(mut conn) => conn.ping().await,
            Err(_) => false,
        }
    }

    /// Close the connection. Closing an already-closed handle is a no-op.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        let taken = self.inner.connection.lock().await.take();
        match taken {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// In-memory connection that counts closes and can be told to fail them.
    #[derive(Debug, Default)]
    pub struct FakeConnection {
        pub closes: Arc<AtomicUsize>,
        pub fail_close: Arc<AtomicBool>,
        pub queries: usize,
    }

    #[async_trait]
    impl TenantConnection for FakeConnection {
        async fn ping(&mut self) -> bool {
            true
        }

        async fn close(self) -> Result<(), ConnectionError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close.load(Ordering::SeqCst) {
                return Err(ConnectionError::Query("terminating connection".to_string()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::FakeConnection;
    use super::*;

    fn handle() -> (ConnectionHandle<FakeConnection>, Arc<std::sync::atomic::AtomicUsize>) {
        let conn = FakeConnection::default();
        let closes = Arc::clone(&conn.closes);
        (ConnectionHandle::new(7, TenantId::from("acme"), conn), closes)
    }

    #[tokio::test]
    async fn exposes_identity() {
        let (h, _) = handle();
        assert_eq!(h.id(), 7);
        assert_eq!(h.tenant().as_str(), "acme");
        assert!(h.same_connection(&h.clone()));
    }

    #[tokio::test]
    async fn connection_gives_mutable_access() {
        let (h, _) = handle();
        h.connection().await.unwrap().queries += 1;
        h.connection().await.unwrap().queries += 1;
        assert_eq!(h.connection().await.unwrap().queries, 2);
        assert!(h.ping().await);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (h, closes) = handle();
        let other = h.clone();

        h.close().await.unwrap();
        other.close().await.unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(h.is_closed().await);
        assert!(!h.ping().await);
        assert_eq!(
            other.connection().await.unwrap_err(),
            ConnectionError::Closed
        );
    }

    #[tokio::test]
    async fn close_failure_still_closes_handle() {
        let (h, _) = handle();
        h.connection()
            .await
            .unwrap()
            .fail_close
            .store(true, Ordering::SeqCst);

        assert!(h.close().await.is_err());
        assert!(h.is_closed().await);
    }
}

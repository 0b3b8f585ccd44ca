//! In-flight initialization table.
//!
//! At most one factory call per tenant is in flight. Every caller that asks
//! for the tenant meanwhile subscribes to the same `watch` channel and
//! receives the same handle or the same error. Entries are removed when the
//! init resolves, succeeds or fails, and dropped wholesale on shutdown, which
//! waiters observe as [`AcquireError::ShuttingDown`].

use std::collections::HashMap;

use tenancy_core::TenantId;
use tokio::sync::watch;

use crate::error::{AcquireError, AcquireResult};
use crate::handle::ConnectionHandle;

type InitOutcome<C> = Option<AcquireResult<ConnectionHandle<C>>>;

struct PendingInit<C> {
    id: u64,
    tx: watch::Sender<InitOutcome<C>>,
}

/// A caller parked on an in-flight initialization.
pub struct InitWaiter<C> {
    rx: watch::Receiver<InitOutcome<C>>,
}

impl<C> InitWaiter<C> {
    /// Wait for the initialization to resolve.
    pub async fn wait(mut self) -> AcquireResult<ConnectionHandle<C>> {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => Option::clone(&outcome),
            // Sender dropped without an outcome: the table was cleared.
            Err(_) => None,
        };
        outcome.unwrap_or(Err(AcquireError::ShuttingDown))
    }
}

pub struct PendingInits<C> {
    inits: HashMap<TenantId, PendingInit<C>>,
}

impl<C> Default for PendingInits<C> {
    fn default() -> Self {
        Self {
            inits: HashMap::new(),
        }
    }
}

impl<C> PendingInits<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new in-flight init for `tenant`, returning the first waiter.
    ///
    /// The caller must have checked [`subscribe`](Self::subscribe) under the
    /// same lock; a second registration for a tenant replaces the first.
    pub fn register(&mut self, tenant: TenantId, id: u64) -> InitWaiter<C> {
        let (tx, rx) = watch::channel(None);
        self.inits.insert(tenant.clone(), PendingInit { id, tx });
        InitWaiter { rx }
    }

    /// Join the in-flight init for `tenant`, if any.
    pub fn subscribe(&self, tenant: &TenantId) -> Option<InitWaiter<C>> {
        self.inits.get(tenant).map(|init| InitWaiter {
            rx: init.tx.subscribe(),
        })
    }

    /// Whether init `id` is still the live one for `tenant`.
    ///
    /// False after a shutdown cleared the table while the factory ran.
    pub fn is_current(&self, tenant: &TenantId, id: u64) -> bool {
        self.inits.get(tenant).is_some_and(|init| init.id == id)
    }

    /// Remove init `id` and deliver `outcome` to all its waiters.
    ///
    /// Returns `false` (delivering nothing) if `id` is no longer current.
    pub fn resolve(
        &mut self,
        tenant: &TenantId,
        id: u64,
        outcome: AcquireResult<ConnectionHandle<C>>,
    ) -> bool {
        if !self.is_current(tenant, id) {
            return false;
        }
        if let Some(init) = self.inits.remove(tenant) {
            init.tx.send_replace(Some(outcome));
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inits.len()
    }

    /// Drop every in-flight entry. Returns how many were abandoned.
    pub fn clear(&mut self) -> usize {
        let abandoned = self.inits.len();
        self.inits.clear();
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;
    use crate::handle::testing::FakeConnection;

    fn acme() -> TenantId {
        TenantId::from("acme")
    }

    #[tokio::test]
    async fn all_waiters_receive_same_handle() {
        let mut inits = PendingInits::<FakeConnection>::new();
        let first = inits.register(acme(), 1);
        let second = inits.subscribe(&acme()).unwrap();
        assert!(inits.is_current(&acme(), 1));
        assert_eq!(inits.len(), 1);

        let handle = ConnectionHandle::new(1, acme(), FakeConnection::default());
        assert!(inits.resolve(&acme(), 1, Ok(handle.clone())));
        assert_eq!(inits.len(), 0);

        let a = first.wait().await.unwrap();
        let b = second.wait().await.unwrap();
        assert!(a.same_connection(&handle));
        assert!(b.same_connection(&handle));
    }

    #[tokio::test]
    async fn all_waiters_receive_same_error() {
        let mut inits = PendingInits::<FakeConnection>::new();
        let first = inits.register(acme(), 1);
        let second = inits.subscribe(&acme()).unwrap();

        let err = AcquireError::connection(&acme(), ConnectionError::SchemaMissing("acme".into()));
        inits.resolve(&acme(), 1, Err(err.clone()));

        assert_eq!(first.wait().await.unwrap_err(), err);
        assert_eq!(second.wait().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn late_subscriber_is_absent_after_resolve() {
        let mut inits = PendingInits::<FakeConnection>::new();
        let _first = inits.register(acme(), 1);
        inits.resolve(
            &acme(),
            1,
            Err(AcquireError::ShuttingDown),
        );
        assert!(inits.subscribe(&acme()).is_none());
    }

    #[tokio::test]
    async fn stale_resolve_is_ignored() {
        let mut inits = PendingInits::<FakeConnection>::new();
        let _old = inits.register(acme(), 1);
        inits.clear();
        let fresh = inits.register(acme(), 2);

        assert!(!inits.is_current(&acme(), 1));
        assert!(!inits.resolve(&acme(), 1, Err(AcquireError::ShuttingDown)));
        assert!(inits.is_current(&acme(), 2));

        let handle = ConnectionHandle::new(2, acme(), FakeConnection::default());
        assert!(inits.resolve(&acme(), 2, Ok(handle)));
        assert_eq!(fresh.wait().await.unwrap().id(), 2);
    }

    #[tokio::test]
    async fn clear_wakes_waiters_with_shutdown() {
        let mut inits = PendingInits::<FakeConnection>::new();
        let waiter = inits.register(acme(), 1);
        assert_eq!(inits.clear(), 1);
        assert_eq!(waiter.wait().await.unwrap_err(), AcquireError::ShuttingDown);
    }
}

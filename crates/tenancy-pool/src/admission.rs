//! Admission queue — FIFO waiters for new tenants while every slot is taken.
//!
//! Queued requests hold no slot. When a slot frees up, the pool pops the
//! head and re-runs admission for it from scratch under the pool lock,
//! since the tenant may have become resident or started initializing in
//! the meantime. The outcome is delivered over a oneshot channel.

use std::collections::VecDeque;

use tenancy_core::TenantId;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::dedup::InitWaiter;
use crate::error::{AcquireError, AcquireResult};
use crate::handle::ConnectionHandle;

/// Result of admitting a request without queueing.
pub enum Admission<C> {
    /// The tenant is resident.
    Ready(ConnectionHandle<C>),
    /// An init for the tenant is in flight (possibly just started for this caller).
    Pending(InitWaiter<C>),
}

pub struct QueuedRequest<C> {
    ticket: u64,
    tenant: TenantId,
    enqueued_at: Instant,
    tx: oneshot::Sender<AcquireResult<Admission<C>>>,
}

impl<C> QueuedRequest<C> {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Whether the caller stopped waiting.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Hand the outcome to the parked caller. A caller that already left is ignored.
    pub fn complete(self, outcome: AcquireResult<Admission<C>>) {
        let _ = self.tx.send(outcome);
    }
}

/// The parked side of a [`QueuedRequest`].
pub struct QueuedWaiter<C> {
    ticket: u64,
    rx: oneshot::Receiver<AcquireResult<Admission<C>>>,
}

impl<C> QueuedWaiter<C> {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub async fn wait(self) -> AcquireResult<Admission<C>> {
        self.rx.await.unwrap_or(Err(AcquireError::ShuttingDown))
    }
}

pub struct AdmissionQueue<C> {
    queue: VecDeque<QueuedRequest<C>>,
    next_ticket: u64,
}

impl<C> Default for AdmissionQueue<C> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            next_ticket: 1,
        }
    }
}

impl<C> AdmissionQueue<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request to the tail.
    pub fn push(&mut self, tenant: TenantId) -> QueuedWaiter<C> {
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let (tx, rx) = oneshot::channel();
        self.queue.push_back(QueuedRequest {
            ticket,
            tenant,
            enqueued_at: Instant::now(),
            tx,
        });
        QueuedWaiter { ticket, rx }
    }

    pub fn front(&self) -> Option<&QueuedRequest<C>> {
        self.queue.front()
    }

    pub fn pop_front(&mut self) -> Option<QueuedRequest<C>> {
        self.queue.pop_front()
    }

    /// Remove a request whose caller gave up. Returns `false` if it was
    /// already dequeued.
    pub fn cancel(&mut self, ticket: u64) -> bool {
        match self.queue.iter().position(|req| req.ticket == ticket) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Fail every queued request with `err`. Returns how many were rejected.
    pub fn reject_all(&mut self, err: AcquireError) -> usize {
        let rejected = self.queue.len();
        for req in self.queue.drain(..) {
            req.complete(Err(err.clone()));
        }
        rejected
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::testing::FakeConnection;

    type Queue = AdmissionQueue<FakeConnection>;

    #[tokio::test]
    async fn fifo_order() {
        let mut queue = Queue::new();
        let _a = queue.push(TenantId::from("a"));
        let _b = queue.push(TenantId::from("b"));
        let _c = queue.push(TenantId::from("a"));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_front())
            .map(|req| req.tenant().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn complete_delivers_to_waiter() {
        let mut queue = Queue::new();
        let waiter = queue.push(TenantId::from("acme"));

        let handle = ConnectionHandle::new(3, TenantId::from("acme"), FakeConnection::default());
        queue
            .pop_front()
            .unwrap()
            .complete(Ok(Admission::Ready(handle)));

        match waiter.wait().await {
            Ok(Admission::Ready(h)) => assert_eq!(h.id(), 3),
            _ => panic!("expected a ready handle"),
        }
    }

    #[tokio::test]
    async fn cancel_removes_only_that_ticket() {
        let mut queue = Queue::new();
        let a = queue.push(TenantId::from("a"));
        let _b = queue.push(TenantId::from("b"));

        assert!(queue.cancel(a.ticket()));
        assert!(!queue.cancel(a.ticket()));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front().unwrap().tenant().as_str(), "b");
    }

    #[tokio::test]
    async fn dropped_waiter_is_abandoned() {
        let mut queue = Queue::new();
        let waiter = queue.push(TenantId::from("a"));
        assert!(!queue.front().unwrap().is_abandoned());
        drop(waiter);
        assert!(queue.front().unwrap().is_abandoned());
    }

    #[tokio::test]
    async fn reject_all_fails_everyone() {
        let mut queue = Queue::new();
        let a = queue.push(TenantId::from("a"));
        let b = queue.push(TenantId::from("b"));

        assert_eq!(queue.reject_all(AcquireError::ShuttingDown), 2);
        assert_eq!(queue.len(), 0);
        assert!(matches!(a.wait().await, Err(AcquireError::ShuttingDown)));
        assert!(matches!(b.wait().await, Err(AcquireError::ShuttingDown)));
    }
}

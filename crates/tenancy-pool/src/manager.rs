//! Tenant pool — the lifecycle manager behind `acquire()`.
//!
//! # Architecture
//!
//! ```text
//! acquire(tenant)
//!   → resident in registry        → touch, return handle          (fast path)
//!   → init in flight for tenant   → wait on it, same handle/error (dedup)
//!   → free slot                   → register init, spawn factory call, wait
//!   → no free slot                → park in admission queue (FIFO)
//!                                     → re-admitted from scratch when a slot frees
//!
//! idle reaper (every reap_interval while anything is resident)
//!   → evict entries idle > idle_timeout, close them, wake the queue
//! ```
//!
//! # Concurrency
//!
//! Registry, in-flight inits, and the admission queue live in one
//! `PoolState` behind a single `std::sync::Mutex`. The lock is never held
//! across an `.await`: factory calls run in spawned tasks and handle closes
//! run in their own tasks after the lock is released, so a connection still
//! in use by a caller never holds up the reaper or other tenants.
//!
//! A slot is one of: a resident connection, an in-flight init, or an
//! evicted connection still being closed. At most `max_connections` slots
//! exist at any time.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tenancy_core::{ConfigError, TenantId};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::admission::{Admission, AdmissionQueue, QueuedWaiter};
use crate::config::PoolConfig;
use crate::dedup::{InitWaiter, PendingInits};
use crate::error::{AcquireError, AcquireResult, ConnectionError};
use crate::factory::TenantConnectionFactory;
use crate::handle::ConnectionHandle;
use crate::reaper::ReaperTask;
use crate::registry::ConnectionRegistry;

/// Point-in-time view of pool occupancy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Tenants with an open, registered connection.
    pub resident: usize,
    /// Factory calls in flight.
    pub pending: usize,
    /// Evicted connections still being closed.
    pub closing: usize,
    /// Requests parked in the admission queue.
    pub queued: usize,
    pub max_connections: usize,
    pub reaper_running: bool,
    /// Idle sweeps run so far (background and manual).
    pub sweeps: u64,
    /// Factory calls started so far.
    pub factory_calls: u64,
}

impl PoolStats {
    /// Slots currently occupied.
    pub fn active_slots(&self) -> usize {
        self.resident + self.pending + self.closing
    }
}

/// Where `acquire()` goes after the admission decision.
enum Route<C> {
    Wait(InitWaiter<C>),
    Queue(QueuedWaiter<C>),
}

struct PoolState<C> {
    registry: ConnectionRegistry<C>,
    pending: PendingInits<C>,
    queue: AdmissionQueue<C>,
    reaper: Option<ReaperTask>,
    closing: usize,
    closed: bool,
    next_init: u64,
    sweeps: u64,
    factory_calls: u64,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            pending: PendingInits::new(),
            queue: AdmissionQueue::new(),
            reaper: None,
            closing: 0,
            closed: false,
            next_init: 1,
            sweeps: 0,
            factory_calls: 0,
        }
    }

    fn active_slots(&self) -> usize {
        self.registry.len() + self.pending.len() + self.closing
    }
}

pub(crate) struct PoolInner<F: TenantConnectionFactory> {
    config: PoolConfig,
    factory: F,
    state: Mutex<PoolState<F::Connection>>,
}

/// Hands out tenant-scoped connections under a global connection budget.
///
/// Cloning is cheap and every clone drives the same pool. Create one per
/// process and call [`release_all`](Self::release_all) on shutdown.
pub struct TenantPool<F: TenantConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: TenantConnectionFactory> Clone for TenantPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: TenantConnectionFactory> TenantPool<F> {
    /// Build a pool. Fails if `config` has no slots or a zero `reap_interval`.
    pub fn new(config: PoolConfig, factory: F) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState::new()),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Get a connection bound to `tenant`'s schema.
    ///
    /// Resident tenants return immediately, regardless of capacity.
    /// Concurrent first requests for the same tenant share one factory
    /// call and its outcome. New tenants beyond capacity wait in FIFO order
    /// (or fail with `CapacityExceeded` when `max_queued` is set). The whole
    /// call is bounded by `acquire_timeout` when set.
    ///
    /// Factory failures are returned as-is and not retried.
    pub async fn acquire(&self, tenant: &TenantId) -> AcquireResult<ConnectionHandle<F::Connection>> {
        match self.inner.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.acquire_unbounded(tenant))
                .await
                .map_err(|_| AcquireError::Timeout {
                    tenant: tenant.clone(),
                    waited: limit,
                })?,
            None => self.acquire_unbounded(tenant).await,
        }
    }

    async fn acquire_unbounded(
        &self,
        tenant: &TenantId,
    ) -> AcquireResult<ConnectionHandle<F::Connection>> {
        let route = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(AcquireError::ShuttingDown);
            }

            match self.inner.admit(&mut state, tenant) {
                Some(Admission::Ready(handle)) => return Ok(handle),
                Some(Admission::Pending(waiter)) => Route::Wait(waiter),
                None => {
                    if let Some(limit) = self.inner.config.max_queued {
                        if state.queue.len() >= limit {
                            debug!(tenant = %tenant, queued = state.queue.len(), "admission queue full");
                            return Err(AcquireError::CapacityExceeded {
                                tenant: tenant.clone(),
                                queued: state.queue.len(),
                            });
                        }
                    }

                    let queued = state.queue.push(tenant.clone());
                    debug!(
                        tenant = %tenant,
                        position = state.queue.len(),
                        active = state.active_slots(),
                        "at capacity, request queued"
                    );
                    Route::Queue(queued)
                }
            }
        };

        let waiter = match route {
            Route::Wait(waiter) => waiter,
            Route::Queue(queued) => {
                let mut guard = QueueGuard {
                    inner: &self.inner,
                    ticket: queued.ticket(),
                    armed: true,
                };
                let admission = queued.wait().await;
                guard.armed = false;

                match admission? {
                    Admission::Ready(handle) => return Ok(handle),
                    Admission::Pending(waiter) => waiter,
                }
            }
        };
        waiter.wait().await
    }

    /// Close every connection and stop the reaper.
    ///
    /// Queued requests and callers waiting on an in-flight init fail with
    /// [`AcquireError::ShuttingDown`], as does every later `acquire()`.
    /// Inits still running close their connection when they finish.
    /// Connections still in use are closed once their caller lets go; this
    /// call waits for them at most `drain_timeout`.
    /// Idempotent; returns the number of connections released by this call.
    pub async fn release_all(&self) -> usize {
        let (entries, rejected, abandoned) = {
            let mut state = self.inner.lock();
            state.closed = true;
            let rejected = state.queue.reject_all(AcquireError::ShuttingDown);
            let abandoned = state.pending.clear();
            if let Some(reaper) = state.reaper.take() {
                reaper.stop();
            }
            (state.registry.drain(), rejected, abandoned)
        };

        let released = entries.len();
        let closes: Vec<_> = entries
            .into_iter()
            .map(|(tenant, entry)| {
                tokio::spawn(async move {
                    if let Err(e) = entry.handle.close().await {
                        warn!(tenant = %tenant, error = %e, "failed to close tenant connection on shutdown");
                    }
                })
            })
            .collect();

        let drain_timeout = self.inner.config.drain_timeout;
        let mut remaining = closes.len();
        let drained = tokio::time::timeout(drain_timeout, async {
            for close in closes {
                let _ = close.await;
                remaining -= 1;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = remaining,
                drain_timeout = ?drain_timeout,
                "drain timeout expired, connections still in use will close when released"
            );
        }

        if released > 0 || rejected > 0 || abandoned > 0 {
            info!(
                closed = released,
                rejected = rejected,
                abandoned = abandoned,
                "tenant pool released"
            );
        }
        released
    }

    /// Run one idle sweep now. Returns the number of connections evicted.
    ///
    /// Eviction is immediate; the evicted connections close in the
    /// background and free their slots as they finish.
    pub async fn reap_idle(&self) -> usize {
        self.inner.sweep()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            resident: state.registry.len(),
            pending: state.pending.len(),
            closing: state.closing,
            queued: state.queue.len(),
            max_connections: self.inner.config.max_connections,
            reaper_running: state.reaper.is_some(),
            sweeps: state.sweeps,
            factory_calls: state.factory_calls,
        }
    }

    pub fn is_resident(&self, tenant: &TenantId) -> bool {
        self.inner.lock().registry.contains(tenant)
    }

    pub fn resident_tenants(&self) -> Vec<TenantId> {
        self.inner.lock().registry.tenants()
    }

    /// Log pool statistics at `tracing::info` level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            resident = stats.resident,
            pending = stats.pending,
            closing = stats.closing,
            queued = stats.queued,
            max_connections = stats.max_connections,
            reaper_running = stats.reaper_running,
            sweeps = stats.sweeps,
            factory_calls = stats.factory_calls,
            "tenant pool statistics"
        );
    }
}

impl<F: TenantConnectionFactory> PoolInner<F> {
    fn lock(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `tenant` without queueing: fast path, dedup join, or a new
    /// init if a slot is free. `None` means every slot is taken.
    fn admit(
        self: &Arc<Self>,
        state: &mut PoolState<F::Connection>,
        tenant: &TenantId,
    ) -> Option<Admission<F::Connection>> {
        if let Some(entry) = state.registry.get(tenant) {
            let handle = entry.handle.clone();
            state.registry.touch(tenant);
            debug!(tenant = %tenant, handle = handle.id(), "reusing resident connection");
            return Some(Admission::Ready(handle));
        }

        if let Some(waiter) = state.pending.subscribe(tenant) {
            debug!(tenant = %tenant, "joining in-flight initialization");
            return Some(Admission::Pending(waiter));
        }

        if state.active_slots() < self.config.max_connections {
            return Some(Admission::Pending(self.start_init(state, tenant)));
        }
        None
    }

    /// Claim a slot for `tenant` and open its connection in the background.
    fn start_init(
        self: &Arc<Self>,
        state: &mut PoolState<F::Connection>,
        tenant: &TenantId,
    ) -> InitWaiter<F::Connection> {
        let id = state.next_init;
        state.next_init += 1;
        state.factory_calls += 1;
        let waiter = state.pending.register(tenant.clone(), id);

        debug!(
            tenant = %tenant,
            init = id,
            active = state.active_slots(),
            "opening tenant connection"
        );

        let pool = Arc::clone(self);
        let tenant = tenant.clone();
        tokio::spawn(async move {
            let mut guard = InitGuard {
                pool: &pool,
                tenant: &tenant,
                id,
                armed: true,
            };
            let result = pool.factory.create(&tenant).await;
            guard.armed = false;
            drop(guard);
            pool.finish_init(tenant, id, result).await;
        });
        waiter
    }

    /// Fail init `id` whose factory call never returned (panicked or was
    /// dropped with the runtime), freeing its slot.
    fn abandon_init(self: &Arc<Self>, tenant: &TenantId, id: u64) {
        let mut state = self.lock();
        let err = AcquireError::connection(tenant, ConnectionError::Aborted);
        if state.pending.resolve(tenant, id, Err(err)) {
            warn!(tenant = %tenant, init = id, "tenant connection setup aborted");
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            self.drain_queue(&mut state);
        }
    }

    async fn finish_init(
        self: &Arc<Self>,
        tenant: TenantId,
        id: u64,
        result: Result<F::Connection, ConnectionError>,
    ) {
        let orphan = {
            let mut state = self.lock();
            let orphan = match result {
                Ok(conn) => {
                    let handle = ConnectionHandle::new(id, tenant.clone(), conn);
                    if state.pending.is_current(&tenant, id) {
                        state.registry.put(tenant.clone(), handle.clone());
                        state.pending.resolve(&tenant, id, Ok(handle.clone()));
                        self.ensure_reaper(&mut state);
                        info!(
                            tenant = %tenant,
                            handle = id,
                            resident = state.registry.len(),
                            "tenant connection opened"
                        );
                        None
                    } else {
                        Some(handle)
                    }
                }
                Err(e) => {
                    warn!(tenant = %tenant, error = %e, "tenant connection failed");
                    state
                        .pending
                        .resolve(&tenant, id, Err(AcquireError::connection(&tenant, e)));
                    None
                }
            };
            self.drain_queue(&mut state);
            orphan
        };

        // The pool shut down while the factory ran.
        if let Some(handle) = orphan {
            debug!(tenant = %tenant, handle = id, "closing connection opened during shutdown");
            if let Err(e) = handle.close().await {
                warn!(tenant = %tenant, error = %e, "failed to close orphaned connection");
            }
        }
    }

    /// Re-admit queued requests from the head while slots allow.
    fn drain_queue(self: &Arc<Self>, state: &mut PoolState<F::Connection>) {
        if state.closed {
            return;
        }
        loop {
            let (tenant, abandoned) = match state.queue.front() {
                Some(req) => (req.tenant().clone(), req.is_abandoned()),
                None => break,
            };
            if abandoned {
                state.queue.pop_front();
                continue;
            }

            let Some(admission) = self.admit(state, &tenant) else {
                break;
            };
            if let Some(req) = state.queue.pop_front() {
                debug!(
                    tenant = %tenant,
                    waited = ?req.enqueued_at().elapsed(),
                    remaining = state.queue.len(),
                    "dequeued request"
                );
                req.complete(Ok(admission));
            }
        }
    }

    fn ensure_reaper(self: &Arc<Self>, state: &mut PoolState<F::Connection>) {
        if state.reaper.is_none() && !state.closed {
            state.reaper = Some(ReaperTask::spawn(
                Arc::downgrade(self),
                self.config.reap_interval,
            ));
        }
    }

    /// Evict connections idle longer than `idle_timeout`.
    ///
    /// Eviction is decided under the pool lock, so it never interleaves with
    /// an `acquire()` touching the same tenant. Each evicted connection is
    /// closed in its own task and keeps its slot until the close returns,
    /// so one connection still held by a caller delays only its own slot.
    /// Close failures are logged and the slot is freed anyway.
    pub(crate) fn sweep(self: &Arc<Self>) -> usize {
        let mut state = self.lock();
        state.sweeps += 1;

        let expired = state
            .registry
            .expired(Instant::now(), self.config.idle_timeout);
        let evicted: Vec<_> = expired
            .iter()
            .filter_map(|tenant| state.registry.remove(tenant))
            .map(|entry| entry.handle)
            .collect();
        state.closing += evicted.len();

        if state.registry.is_empty() {
            if let Some(reaper) = state.reaper.take() {
                reaper.stop();
            }
        }
        drop(state);

        let count = evicted.len();
        for handle in evicted {
            debug!(tenant = %handle.tenant(), handle = handle.id(), "evicting idle tenant connection");
            self.spawn_close(handle);
        }
        count
    }

    /// Close an evicted connection, then release its slot and wake the queue.
    fn spawn_close(self: &Arc<Self>, handle: ConnectionHandle<F::Connection>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            match handle.close().await {
                Ok(()) => info!(
                    tenant = %handle.tenant(),
                    handle = handle.id(),
                    "evicted idle tenant connection"
                ),
                Err(e) => warn!(
                    tenant = %handle.tenant(),
                    handle = handle.id(),
                    error = %e,
                    "failed to close idle tenant connection, evicted anyway"
                ),
            }

            let mut state = pool.lock();
            state.closing -= 1;
            pool.drain_queue(&mut state);
        });
    }
}

/// Resolves an init whose factory future is dropped before returning.
struct InitGuard<'a, F: TenantConnectionFactory> {
    pool: &'a Arc<PoolInner<F>>,
    tenant: &'a TenantId,
    id: u64,
    armed: bool,
}

impl<F: TenantConnectionFactory> Drop for InitGuard<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.abandon_init(self.tenant, self.id);
        }
    }
}

/// Removes a queued request if its caller stops waiting (dropped future or
/// `acquire_timeout`).
struct QueueGuard<'a, F: TenantConnectionFactory> {
    inner: &'a PoolInner<F>,
    ticket: u64,
    armed: bool,
}

impl<F: TenantConnectionFactory> Drop for QueueGuard<'_, F> {
    fn drop(&mut self) {
        if self.armed && self.inner.lock().queue.cancel(self.ticket) {
            debug!(ticket = self.ticket, "queued request cancelled");
        }
    }
}

impl<F: TenantConnectionFactory> fmt::Debug for TenantPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

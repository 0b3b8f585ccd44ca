//! Idle reaper — background sweep closing connections nobody acquired lately.
//!
//! The task exists only while the registry is non-empty: the pool spawns it
//! with the first insert into an empty registry and stops it from the sweep
//! that leaves the registry empty. Both happen under the pool lock, so two
//! inserts never race to start two reapers.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::factory::TenantConnectionFactory;
use crate::manager::PoolInner;

/// Handle to the running reaper task.
pub(crate) struct ReaperTask {
    shutdown_tx: watch::Sender<bool>,
    /// Dropping the handle detaches the task; it exits on the shutdown signal.
    _handle: JoinHandle<()>,
}

impl ReaperTask {
    /// Spawn the reaper. It holds only a weak reference so a dropped pool
    /// does not stay alive through its own background task.
    pub(crate) fn spawn<F: TenantConnectionFactory>(
        pool: Weak<PoolInner<F>>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_reaper(pool, interval, shutdown_rx));
        debug!(interval = ?interval, "idle reaper started");
        Self {
            shutdown_tx,
            _handle: handle,
        }
    }

    /// Signal the task to exit.
    pub(crate) fn stop(self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_reaper<F: TenantConnectionFactory>(
    pool: Weak<PoolInner<F>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(pool) = pool.upgrade() else {
                    debug!("tenant pool dropped, idle reaper exiting");
                    break;
                };
                pool.sweep();
            }
            _ = shutdown.changed() => {
                debug!("idle reaper stopped");
                break;
            }
        }
    }
}

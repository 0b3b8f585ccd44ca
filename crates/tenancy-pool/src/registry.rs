//! Connection registry — which tenants currently hold an open connection.
//!
//! Pure bookkeeping: nothing here opens or closes connections. The
//! registry is owned by the pool state and only mutated under the pool
//! lock.

use std::collections::HashMap;
use std::time::Duration;

use tenancy_core::TenantId;
use tokio::time::Instant;

use crate::handle::ConnectionHandle;

/// A resident tenant connection with access tracking.
#[derive(Debug)]
pub struct RegistryEntry<C> {
    pub handle: ConnectionHandle<C>,
    pub last_access: Instant,
}

impl<C> RegistryEntry<C> {
    /// Time since the last `acquire()` that touched this entry.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access)
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry<C> {
    entries: HashMap<TenantId, RegistryEntry<C>>,
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<C> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant: &TenantId) -> Option<&RegistryEntry<C>> {
        self.entries.get(tenant)
    }

    /// Insert with `last_access = now`, replacing any previous entry.
    pub fn put(&mut self, tenant: TenantId, handle: ConnectionHandle<C>) {
        self.entries.insert(
            tenant,
            RegistryEntry {
                handle,
                last_access: Instant::now(),
            },
        );
    }

    /// Refresh `last_access`. No-op for unknown tenants.
    pub fn touch(&mut self, tenant: &TenantId) {
        if let Some(entry) = self.entries.get_mut(tenant) {
            entry.last_access = Instant::now();
        }
    }

    /// Remove and return the entry; closing its handle is the caller's job.
    pub fn remove(&mut self, tenant: &TenantId) -> Option<RegistryEntry<C>> {
        self.entries.remove(tenant)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.entries.contains_key(tenant)
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<_> = self.entries.keys().cloned().collect();
        tenants.sort();
        tenants
    }

    /// Tenants idle for strictly longer than `idle_timeout` at `now`.
    pub fn expired(&self, now: Instant, idle_timeout: Duration) -> Vec<TenantId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.idle_for(now) > idle_timeout)
            .map(|(tenant, _)| tenant.clone())
            .collect()
    }

    /// Remove every entry, handing them back for closing.
    pub fn drain(&mut self) -> Vec<(TenantId, RegistryEntry<C>)> {
        self.entries.drain().collect()
    }
}

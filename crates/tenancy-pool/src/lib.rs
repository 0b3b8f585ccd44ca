//! tenancy-pool — tenant connection lifecycle manager.
//!
//! Hands out database connections scoped to one tenant's schema while
//! keeping the total number of open connections under a fixed budget.
//! Connections are opened lazily on first use, shared by every later
//! request for the same tenant, and closed by a background reaper once
//! they sit idle.
//!
//! # Architecture
//!
//! ```text
//! TenantPool
//!   ├── ConnectionRegistry   (resident tenant → handle, last access)
//!   ├── PendingInits         (one in-flight factory call per tenant)
//!   ├── AdmissionQueue       (FIFO waiters for new tenants at capacity)
//!   ├── Idle reaper task     (alive only while something is resident)
//!   └── TenantConnectionFactory
//!         └── PgTenantFactory → PgTenantConnection (search_path = tenant schema)
//! ```
//!
//! # Capacity
//!
//! Resident connections, in-flight initializations, and evicted
//! connections still closing all count against `max_connections`. A
//! request for a tenant that is already resident never waits on capacity.

pub(crate) mod admission;
pub mod config;
pub(crate) mod dedup;
pub mod error;
pub mod factory;
pub mod handle;
pub mod manager;
pub mod postgres;
mod reaper;
pub(crate) mod registry;

pub use config::PoolConfig;
pub use error::{AcquireError, AcquireResult, ConnectionError};
pub use factory::TenantConnectionFactory;
pub use handle::{ConnectionHandle, TenantConnection};
pub use manager::{PoolStats, TenantPool};
pub use postgres::{DatabaseConfig, PgTenantConnection, PgTenantFactory, quote_ident};
pub use tenancy_core::TenantId;

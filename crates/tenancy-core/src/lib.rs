//! tenancy-core — tenant identity and `tenancy.toml` configuration.

pub mod config;
pub mod duration;
pub mod types;

pub use config::{ConfigError, DatabaseSection, PoolSection, TenancyConfig};
pub use duration::parse_duration;
pub use types::*;

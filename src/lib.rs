//! valkey-groups library
//!
//! Named Valkey/Redis groups behind topology-agnostic providers. Each group
//! is standalone, client-side sharded or cluster; callers lease a connection
//! per thread without knowing which.

pub mod client;
pub mod cluster;
pub mod config;
pub mod provider;
pub mod registry;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Commands, CommandsExt};
pub use config::{GroupConfig, GroupSettings, PoolConfig, TopologyKind};
pub use provider::{Lease, LeaseGuard, Provider, RedisConnection};
pub use registry::ProviderRegistry;
pub use utils::{ConfigError, ConnectionError, LeaseError, ProviderError, Result};

//! Topology-specific connection managers
//!
//! The topology kind is decided once, at registration, and fixed in a
//! `Backend` variant. Pools and providers never branch on it again.

use std::sync::Arc;

use tracing::debug;

use crate::client::{
    Commands, CommandsExt, ConnectionFactory, ConnectionManager, RawConnection, ShardRing,
    ShardedConnection,
};
use crate::cluster::{ClusterConnection, TopologyManager};
use crate::config::{Endpoint, GroupConfig, TopologyKind};
use crate::utils::{ConfigError, ConnectionError, RespValue};

/// A `ConnectionManager` that can be built from a group's configuration
pub trait TopologyBackend: ConnectionManager {
    /// Build the backend for a validated group; must not perform I/O
    fn from_config(config: &GroupConfig) -> Result<Self, ConfigError>
    where
        Self: Sized;

    fn topology_kind(&self) -> TopologyKind;
}

/// Single node
pub struct StandaloneBackend {
    endpoint: Endpoint,
    factory: ConnectionFactory,
}

impl StandaloneBackend {
    pub fn new(endpoint: Endpoint, factory: ConnectionFactory) -> Self {
        Self { endpoint, factory }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl ConnectionManager for StandaloneBackend {
    type Connection = RawConnection;

    fn connect(&self) -> Result<RawConnection, ConnectionError> {
        self.factory.create(&self.endpoint)
    }

    fn is_valid(&self, conn: &mut RawConnection) -> bool {
        conn.ping().unwrap_or(false)
    }
}

/// Consistent hashing over independent nodes
pub struct ShardedBackend {
    ring: Arc<ShardRing>,
    factory: ConnectionFactory,
}

impl ShardedBackend {
    pub fn new(endpoints: Vec<Endpoint>, factory: ConnectionFactory) -> Self {
        Self {
            ring: Arc::new(ShardRing::new(endpoints)),
            factory,
        }
    }

    pub fn ring(&self) -> &ShardRing {
        &self.ring
    }
}

impl ConnectionManager for ShardedBackend {
    type Connection = ShardedConnection;

    fn connect(&self) -> Result<ShardedConnection, ConnectionError> {
        ShardedConnection::connect(Arc::clone(&self.ring), &self.factory)
    }

    fn is_valid(&self, conn: &mut ShardedConnection) -> bool {
        conn.ping_all().unwrap_or(false)
    }
}

/// Slot-routed cluster; seeds are only contacted on first connect
pub struct ClusterBackend {
    manager: Arc<TopologyManager>,
}

impl ClusterBackend {
    pub fn new(seeds: Vec<Endpoint>, factory: ConnectionFactory) -> Self {
        Self {
            manager: Arc::new(TopologyManager::new(seeds, factory)),
        }
    }

    pub fn topology(&self) -> &TopologyManager {
        &self.manager
    }
}

impl ConnectionManager for ClusterBackend {
    type Connection = ClusterConnection;

    fn connect(&self) -> Result<ClusterConnection, ConnectionError> {
        ClusterConnection::connect(Arc::clone(&self.manager))
    }

    fn is_valid(&self, conn: &mut ClusterConnection) -> bool {
        conn.ping().unwrap_or(false)
    }
}

/// The backend chosen for a group
pub enum Backend {
    Standalone(StandaloneBackend),
    Sharded(ShardedBackend),
    Cluster(ClusterBackend),
}

impl Backend {
    /// Endpoints as configured (cluster: the seed list)
    pub fn endpoints(&self) -> &[Endpoint] {
        match self {
            Backend::Standalone(b) => std::slice::from_ref(&b.endpoint),
            Backend::Sharded(b) => b.ring.endpoints(),
            Backend::Cluster(b) => b.manager.seeds(),
        }
    }
}

impl TopologyBackend for Backend {
    fn from_config(config: &GroupConfig) -> Result<Self, ConfigError> {
        let factory = ConnectionFactory::from_group(config);
        let endpoints = config.endpoints().to_vec();

        let backend = match config.kind() {
            TopologyKind::Standalone => {
                let endpoint = endpoints.into_iter().next().ok_or_else(|| {
                    ConfigError::InvalidTopology {
                        group: config.name().to_string(),
                        reason: "standalone mode takes exactly one server".to_string(),
                    }
                })?;
                Backend::Standalone(StandaloneBackend::new(endpoint, factory))
            }
            TopologyKind::Sharded => Backend::Sharded(ShardedBackend::new(endpoints, factory)),
            TopologyKind::Cluster => Backend::Cluster(ClusterBackend::new(endpoints, factory)),
        };

        debug!(group = %config.name(), kind = %config.kind(), "Selected backend");
        Ok(backend)
    }

    fn topology_kind(&self) -> TopologyKind {
        match self {
            Backend::Standalone(_) => TopologyKind::Standalone,
            Backend::Sharded(_) => TopologyKind::Sharded,
            Backend::Cluster(_) => TopologyKind::Cluster,
        }
    }
}

impl ConnectionManager for Backend {
    type Connection = RedisConnection;

    fn connect(&self) -> Result<RedisConnection, ConnectionError> {
        Ok(match self {
            Backend::Standalone(b) => RedisConnection::Standalone(b.connect()?),
            Backend::Sharded(b) => RedisConnection::Sharded(b.connect()?),
            Backend::Cluster(b) => RedisConnection::Cluster(b.connect()?),
        })
    }

    fn is_valid(&self, conn: &mut RedisConnection) -> bool {
        conn.ping().unwrap_or(false)
    }
}

/// A pooled connection of any topology
pub enum RedisConnection {
    Standalone(RawConnection),
    Sharded(ShardedConnection),
    Cluster(ClusterConnection),
}

impl Commands for RedisConnection {
    fn execute(&mut self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        match self {
            RedisConnection::Standalone(c) => c.execute(args),
            RedisConnection::Sharded(c) => c.execute(args),
            RedisConnection::Cluster(c) => c.execute(args),
        }
    }
}

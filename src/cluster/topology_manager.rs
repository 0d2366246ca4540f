//! Shared cluster slot map with on-demand refresh
//!
//! One `TopologyManager` is shared by every pooled cluster connection of a
//! group. The slot map starts empty (registration does no I/O) and is filled
//! by the first connect. MOVED replies patch single slots in place.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::topology::ClusterTopology;
use crate::client::ConnectionFactory;
use crate::config::Endpoint;
use crate::utils::{ClusterError, ConnectionError};

/// Redirect parsed from a MOVED or ASK error reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectInfo {
    pub slot: u16,
    pub endpoint: Endpoint,
    /// ASK redirects are one-shot and need an ASKING prefix
    pub is_ask: bool,
}

impl RedirectInfo {
    /// Parse "MOVED 3999 127.0.0.1:7001" or "ASK 3999 127.0.0.1:7001"
    pub fn parse(error_msg: &str) -> Option<Self> {
        let mut parts = error_msg.split_whitespace();
        let is_ask = match parts.next()? {
            "ASK" => true,
            "MOVED" => false,
            _ => return None,
        };

        let slot: u16 = parts.next()?.parse().ok()?;
        let (host, port) = parts.next()?.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }

        Some(Self {
            slot,
            endpoint: Endpoint::new(host, port),
            is_ask,
        })
    }
}

pub struct TopologyManager {
    seeds: Vec<Endpoint>,
    factory: ConnectionFactory,
    topology: RwLock<Option<ClusterTopology>>,
    /// Serialises full refreshes
    refresh_lock: Mutex<()>,
    /// Bumped on every successful full refresh
    version: AtomicU64,
}

impl TopologyManager {
    pub fn new(seeds: Vec<Endpoint>, factory: ConnectionFactory) -> Self {
        Self {
            seeds,
            factory,
            topology: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            version: AtomicU64::new(0),
        }
    }

    /// Start from a known slot map
    pub fn with_topology(
        seeds: Vec<Endpoint>,
        factory: ConnectionFactory,
        topology: ClusterTopology,
    ) -> Self {
        let manager = Self::new(seeds, factory);
        *manager.topology.write() = Some(topology);
        manager.version.store(1, Ordering::SeqCst);
        manager
    }

    pub fn seeds(&self) -> &[Endpoint] {
        &self.seeds
    }

    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn is_discovered(&self) -> bool {
        self.topology.read().is_some()
    }

    pub fn node_for_slot(&self, slot: u16) -> Option<Endpoint> {
        self.topology
            .read()
            .as_ref()
            .and_then(|t| t.node_for_slot(slot).cloned())
    }

    pub fn primaries(&self) -> Vec<Endpoint> {
        self.topology
            .read()
            .as_ref()
            .map(|t| t.primaries().to_vec())
            .unwrap_or_default()
    }

    /// Apply a MOVED redirect to the cached slot map
    pub fn note_moved(&self, slot: u16, endpoint: Endpoint) {
        if let Some(topology) = self.topology.write().as_mut() {
            debug!(slot, endpoint = %endpoint, "Slot moved");
            topology.assign(slot, endpoint);
        }
    }

    /// Discover the slot map if no connection has done so yet
    pub fn ensure_discovered(&self) -> Result<(), ClusterError> {
        if self.is_discovered() {
            return Ok(());
        }
        self.refresh(self.version()).map(|_| ())
    }

    /// Reload the slot map from CLUSTER NODES
    ///
    /// `seen_version` is the version the caller observed; if another thread
    /// refreshed in the meantime nothing is fetched and `Ok(false)` is returned.
    pub fn refresh(&self, seen_version: u64) -> Result<bool, ClusterError> {
        let _guard = self.refresh_lock.lock();
        if self.version() != seen_version && self.is_discovered() {
            return Ok(false);
        }

        // Seeds first, then any primary we already know about
        let mut candidates = self.seeds.clone();
        for primary in self.primaries() {
            if !candidates.contains(&primary) {
                candidates.push(primary);
            }
        }

        for endpoint in &candidates {
            match self.fetch_topology_from_node(endpoint) {
                Ok(topology) => {
                    info!(
                        endpoint = %endpoint,
                        primaries = topology.num_primaries(),
                        unassigned_slots = topology.unassigned_slots(),
                        "Cluster topology refreshed"
                    );
                    *self.topology.write() = Some(topology);
                    self.version.fetch_add(1, Ordering::SeqCst);
                    return Ok(true);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Failed to fetch cluster topology");
                }
            }
        }

        Err(ClusterError::NoReachableSeed)
    }

    fn fetch_topology_from_node(&self, endpoint: &Endpoint) -> Result<ClusterTopology, ConnectionError> {
        let mut conn = self.factory.create(endpoint)?;
        let nodes = conn.cluster_nodes()?;
        Ok(ClusterTopology::from_cluster_nodes(&nodes)?)
    }
}

/// Whether an error reply means the cluster cannot serve requests
pub fn is_cluster_down(error_msg: &str) -> bool {
    error_msg.starts_with("CLUSTERDOWN")
}

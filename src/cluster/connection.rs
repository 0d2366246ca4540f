//! Slot-routed connection to a cluster
//!
//! Node sockets are opened lazily as keys route to them. Error replies that
//! carry a MOVED or ASK redirect are followed transparently. A dead node or
//! a CLUSTERDOWN reply triggers a full slot map reload.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::topology::ClusterTopology;
use super::topology_manager::{is_cluster_down, RedirectInfo, TopologyManager};
use crate::client::{Commands, RawConnection};
use crate::config::Endpoint;
use crate::utils::{ClusterError, ConnectionError, RespValue};

/// Attempts per command, including the first one
pub const MAX_ATTEMPTS: usize = 5;

pub struct ClusterConnection {
    manager: Arc<TopologyManager>,
    nodes: HashMap<Endpoint, RawConnection>,
}

impl ClusterConnection {
    /// Discover the slot map if needed and open a socket to the first primary
    ///
    /// If that primary is unreachable the slot map is reloaded once.
    pub fn connect(manager: Arc<TopologyManager>) -> Result<Self, ConnectionError> {
        manager.ensure_discovered()?;

        let mut conn = Self {
            manager,
            nodes: HashMap::new(),
        };

        let seen = conn.manager.version();
        let first = conn.first_primary()?;
        let opened = conn.node(&first).map(|_| ());
        if let Err(e) = opened {
            if !e.is_fatal() {
                return Err(e);
            }
            warn!(endpoint = %first, error = %e, "Primary unreachable, reloading slot map");
            conn.reload(seen)?;
            let first = conn.first_primary()?;
            conn.node(&first)?;
        }
        Ok(conn)
    }

    pub fn manager(&self) -> &TopologyManager {
        &self.manager
    }

    /// Number of node sockets currently open
    pub fn open_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn first_primary(&self) -> Result<Endpoint, ClusterError> {
        self.manager
            .primaries()
            .into_iter()
            .next()
            .ok_or(ClusterError::NoPrimaries)
    }

    fn node(&mut self, endpoint: &Endpoint) -> Result<&mut RawConnection, ConnectionError> {
        match self.nodes.entry(endpoint.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let conn = self.manager.factory().create(endpoint)?;
                trace!(endpoint = %endpoint, "Opened cluster node connection");
                Ok(entry.insert(conn))
            }
        }
    }

    /// Node serving `args[1]`, or any primary for keyless commands
    fn route(&self, args: &[&[u8]]) -> Result<Endpoint, ClusterError> {
        match args.get(1) {
            Some(key) => {
                let slot = ClusterTopology::slot_for_key(key);
                self.manager
                    .node_for_slot(slot)
                    .ok_or(ClusterError::UnassignedSlot(slot))
            }
            None => self.first_primary(),
        }
    }

    /// Reload the shared slot map and drop sockets to nodes that are no
    /// longer primaries
    fn reload(&mut self, seen_version: u64) -> Result<(), ClusterError> {
        self.manager.refresh(seen_version)?;
        let primaries = self.manager.primaries();
        self.nodes.retain(|endpoint, _| primaries.contains(endpoint));
        Ok(())
    }

    fn send(
        &mut self,
        target: &Endpoint,
        args: &[&[u8]],
        asking: bool,
    ) -> Result<RespValue, ConnectionError> {
        let node = self.node(target)?;
        if asking {
            node.execute_str(&["ASKING"])?.into_result()?;
        }
        node.execute(args)
    }
}

impl Commands for ClusterConnection {
    /// Route by slot and follow redirects
    ///
    /// An unreachable node, an unassigned slot or a CLUSTERDOWN reply reloads
    /// the slot map and retries. Every attempt counts against `MAX_ATTEMPTS`.
    fn execute(&mut self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        let mut redirect_to: Option<Endpoint> = None;
        let mut asking = false;
        let mut last: Option<Result<RespValue, ConnectionError>> = None;

        for _ in 0..MAX_ATTEMPTS {
            let seen = self.manager.version();

            let target = match redirect_to.take() {
                Some(endpoint) => endpoint,
                None => match self.route(args) {
                    Ok(endpoint) => endpoint,
                    Err(ClusterError::UnassignedSlot(slot)) => {
                        debug!(slot, "Slot unassigned, reloading slot map");
                        self.reload(seen)?;
                        last = Some(Err(ClusterError::UnassignedSlot(slot).into()));
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
            };

            let reply = match self.send(&target, args, asking) {
                Ok(reply) => reply,
                Err(e) if e.is_fatal() => {
                    self.nodes.remove(&target);
                    warn!(endpoint = %target, error = %e, "Cluster node failed, reloading slot map");
                    if let Err(refresh_err) = self.reload(seen) {
                        debug!(error = %refresh_err, "Slot map reload failed");
                        return Err(e);
                    }
                    asking = false;
                    last = Some(Err(e));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let msg = match reply.error_message() {
                Some(msg) => msg.to_string(),
                None => return Ok(reply),
            };

            if is_cluster_down(&msg) {
                warn!(endpoint = %target, reply = %msg, "Cluster down, reloading slot map");
                self.reload(seen)?;
                asking = false;
                last = Some(Ok(reply));
                continue;
            }

            match RedirectInfo::parse(&msg) {
                Some(redirect) if redirect.is_ask => {
                    debug!(slot = redirect.slot, endpoint = %redirect.endpoint, "ASK redirect");
                    redirect_to = Some(redirect.endpoint);
                    asking = true;
                }
                Some(redirect) => {
                    self.manager.note_moved(redirect.slot, redirect.endpoint.clone());
                    redirect_to = Some(redirect.endpoint);
                    asking = false;
                }
                None => return Ok(reply),
            }
            last = None;
        }

        last.unwrap_or_else(|| Err(ClusterError::TooManyRedirects(MAX_ATTEMPTS).into()))
    }
}

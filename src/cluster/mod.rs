//! Cluster topology and slot routing
//!
//! - Topology discovery via CLUSTER NODES
//! - Slot mapping and CRC16 calculation
//! - MOVED/ASK redirect handling

pub mod connection;
pub mod node;
pub mod topology;
pub mod topology_manager;

pub use connection::ClusterConnection;
pub use node::ClusterNode;
pub use topology::ClusterTopology;
pub use topology_manager::{RedirectInfo, TopologyManager};

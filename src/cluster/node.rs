//! One line of CLUSTER NODES

use crate::config::Endpoint;

/// Cluster node as reported by CLUSTER NODES
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,
    pub endpoint: Endpoint,
    pub is_primary: bool,
    /// Owned slot ranges, inclusive (primaries only)
    pub slots: Vec<(u16, u16)>,
    pub flags: Vec<String>,
    pub connected: bool,
}

impl ClusterNode {
    pub fn is_available(&self) -> bool {
        self.connected && !self.flags.iter().any(|f| f == "fail" || f == "handshake" || f == "noaddr")
    }
}

/// Parse a CLUSTER NODES line
///
/// `<id> <ip:port@cport[,hostname]> <flags> <primary> <ping-sent> <pong-recv> <epoch> <link-state> <slot>...`
pub fn parse_cluster_node_line(line: &str) -> Option<ClusterNode> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 {
        return None;
    }

    let endpoint = parse_node_address(parts[1])?;
    let flags: Vec<String> = parts[2].split(',').map(String::from).collect();
    let is_primary = flags.iter().any(|f| f == "master");

    let slots = if is_primary {
        parts[8..].iter().filter_map(|s| parse_slot_range(s)).collect()
    } else {
        Vec::new()
    };

    Some(ClusterNode {
        id: parts[0].to_string(),
        endpoint,
        is_primary,
        slots,
        flags,
        connected: parts[7] == "connected",
    })
}

/// "host:port@cport", "host:port" or "host:port@cport,hostname"
fn parse_node_address(addr: &str) -> Option<Endpoint> {
    let addr = addr.split(',').next().unwrap_or(addr);
    let host_port = addr.split('@').next().unwrap_or(addr);

    let (host, port) = host_port.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    // Nodes without an address yet report ":0"
    if host.is_empty() || port == 0 {
        return None;
    }

    Some(Endpoint::new(host, port))
}

/// "0-5460" or "42"; importing/migrating markers such as "[123->-id]" are skipped
fn parse_slot_range(s: &str) -> Option<(u16, u16)> {
    if s.starts_with('[') {
        return None;
    }

    match s.split_once('-') {
        Some((start, end)) => Some((start.parse().ok()?, end.parse().ok()?)),
        None => {
            let slot = s.parse().ok()?;
            Some((slot, slot))
        }
    }
}

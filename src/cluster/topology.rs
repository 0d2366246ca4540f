//! Slot ownership snapshot built from CLUSTER NODES

use super::node::{parse_cluster_node_line, ClusterNode};
use crate::config::Endpoint;
use crate::utils::ClusterError;

pub const SLOT_COUNT: usize = 16384;

/// Which primary serves each of the 16384 slots
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    primaries: Vec<Endpoint>,
    /// Slot → index into `primaries`
    slot_map: Vec<Option<usize>>,
}

impl ClusterTopology {
    /// Parse a CLUSTER NODES response
    pub fn from_cluster_nodes(response: &str) -> Result<Self, ClusterError> {
        let nodes: Vec<ClusterNode> = response
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                parse_cluster_node_line(l).ok_or_else(|| ClusterError::ParseFailed(l.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let mut topology = Self {
            primaries: Vec::new(),
            slot_map: vec![None; SLOT_COUNT],
        };

        for node in nodes.iter().filter(|n| n.is_primary && n.is_available()) {
            for &(start, end) in &node.slots {
                if end as usize >= SLOT_COUNT || start > end {
                    return Err(ClusterError::ParseFailed(format!(
                        "slot range {}-{} out of bounds",
                        start, end
                    )));
                }
                for slot in start..=end {
                    topology.assign(slot, node.endpoint.clone());
                }
            }
        }

        if topology.primaries.is_empty() {
            return Err(ClusterError::NoPrimaries);
        }

        Ok(topology)
    }

    /// Primary serving `slot`
    pub fn node_for_slot(&self, slot: u16) -> Option<&Endpoint> {
        self.slot_map
            .get(slot as usize)
            .copied()
            .flatten()
            .map(|idx| &self.primaries[idx])
    }

    /// Record a new owner for one slot (after a MOVED reply)
    pub fn assign(&mut self, slot: u16, endpoint: Endpoint) {
        let idx = match self.primaries.iter().position(|p| *p == endpoint) {
            Some(idx) => idx,
            None => {
                self.primaries.push(endpoint);
                self.primaries.len() - 1
            }
        };
        if let Some(entry) = self.slot_map.get_mut(slot as usize) {
            *entry = Some(idx);
        }
    }

    pub fn primaries(&self) -> &[Endpoint] {
        &self.primaries
    }

    pub fn num_primaries(&self) -> usize {
        self.primaries.len()
    }

    /// Number of slots without an owner
    pub fn unassigned_slots(&self) -> usize {
        self.slot_map.iter().filter(|s| s.is_none()).count()
    }

    /// Hash slot for a key, honouring `{tag}`
    pub fn slot_for_key(key: &[u8]) -> u16 {
        if let Some(start) = key.iter().position(|&b| b == b'{') {
            if let Some(end) = key[start + 1..].iter().position(|&b| b == b'}') {
                if end > 0 {
                    return crc16(&key[start + 1..start + 1 + end]) % SLOT_COUNT as u16;
                }
            }
        }
        crc16(key) % SLOT_COUNT as u16
    }
}

/// CRC16/XMODEM, as used for cluster key slots
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_PRIMARIES: &str = r#"
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30001@31001 master - 0 1426238316232 1 connected 0-5460
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30003@31003 myself,master - 0 1426238316232 3 connected 10923-16383
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30004@31004 slave 07c37dfeb235213a872192d90877d0cd55635b91 0 1426238316232 1 connected
"#;

    #[test]
    fn test_crc16() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_slot_for_key() {
        // Reference values from the cluster spec
        assert_eq!(ClusterTopology::slot_for_key(b"foo"), 12182);
        assert_eq!(
            ClusterTopology::slot_for_key(b"{user1000}.following"),
            ClusterTopology::slot_for_key(b"{user1000}.followers")
        );
        assert_eq!(
            ClusterTopology::slot_for_key(b"foo{}{bar}"),
            crc16(b"foo{}{bar}") % 16384
        );
    }

    #[test]
    fn test_parse_cluster_nodes() {
        let topology = ClusterTopology::from_cluster_nodes(THREE_PRIMARIES).unwrap();

        assert_eq!(topology.num_primaries(), 3);
        assert_eq!(topology.unassigned_slots(), 0);
        assert_eq!(
            topology.node_for_slot(0),
            Some(&Endpoint::new("127.0.0.1", 30001))
        );
        assert_eq!(
            topology.node_for_slot(16383),
            Some(&Endpoint::new("127.0.0.1", 30003))
        );
    }

    #[test]
    fn test_assign_moves_single_slot() {
        let mut topology = ClusterTopology::from_cluster_nodes(THREE_PRIMARIES).unwrap();
        topology.assign(100, Endpoint::new("127.0.0.1", 30002));
        assert_eq!(
            topology.node_for_slot(100),
            Some(&Endpoint::new("127.0.0.1", 30002))
        );
        assert_eq!(
            topology.node_for_slot(101),
            Some(&Endpoint::new("127.0.0.1", 30001))
        );

        topology.assign(101, Endpoint::new("10.1.1.1", 7000));
        assert_eq!(topology.num_primaries(), 4);
    }

    #[test]
    fn test_no_primaries() {
        let response = "292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30004@31004 slave 07c37dfeb235213a872192d90877d0cd55635b91 0 1426238316232 1 connected\n";
        assert_eq!(
            ClusterTopology::from_cluster_nodes(response).unwrap_err(),
            ClusterError::NoPrimaries
        );
    }

    #[test]
    fn test_garbage_line_fails() {
        assert!(matches!(
            ClusterTopology::from_cluster_nodes("not a cluster line"),
            Err(ClusterError::ParseFailed(_))
        ));
    }
}

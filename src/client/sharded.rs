//! Client-side sharding over independent nodes
//!
//! Keys are placed on a consistent-hash ring compatible with Jedis'
//! `ShardedJedis`: each shard contributes 160 virtual nodes named
//! `SHARD-<index>-NODE-<n>`, hashed with MurmurHash64A (seed `0x1234ABCD`),
//! and a key belongs to the first virtual node at or after its hash, wrapping
//! around. A `{tag}` inside the key restricts hashing to the tag.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::commands::{Commands, CommandsExt};
use super::raw_connection::{ConnectionFactory, RawConnection};
use crate::config::Endpoint;
use crate::utils::{ConnectionError, RespValue};

const VIRTUAL_NODES_PER_SHARD: usize = 160;
const MURMUR_SEED: u64 = 0x1234_ABCD;

/// Immutable key → shard ring
#[derive(Debug, Clone)]
pub struct ShardRing {
    endpoints: Vec<Endpoint>,
    ring: BTreeMap<i64, usize>,
}

impl ShardRing {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        let mut ring = BTreeMap::new();
        for shard in 0..endpoints.len() {
            for n in 0..VIRTUAL_NODES_PER_SHARD {
                let name = format!("SHARD-{}-NODE-{}", shard, n);
                ring.insert(murmur_hash64a(name.as_bytes(), MURMUR_SEED), shard);
            }
        }
        Self { endpoints, ring }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Index of the shard owning `key`
    pub fn shard_for(&self, key: &[u8]) -> usize {
        let hash = murmur_hash64a(key_tag(key), MURMUR_SEED);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, &shard)| shard)
            .unwrap_or(0)
    }

    pub fn endpoint_for(&self, key: &[u8]) -> Option<&Endpoint> {
        self.endpoints.get(self.shard_for(key))
    }
}

/// The part of a key that is hashed: the first non-empty `{...}` or the whole key
pub fn key_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[start + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[start + 1..start + 1 + len];
            }
        }
    }
    key
}

/// MurmurHash64A, read little-endian, returned as a signed value so ring
/// ordering matches Java's `TreeMap<Long, _>`
pub fn murmur_hash64a(data: &[u8], seed: u64) -> i64 {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;

    let mut h: u64 = seed ^ (data.len() as u64).wrapping_mul(M);

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(buf);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        let mut buf = [0u8; 8];
        buf[..rest.len()].copy_from_slice(rest);
        h ^= u64::from_le_bytes(buf);
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h as i64
}

/// One socket per shard, routed by key
pub struct ShardedConnection {
    ring: Arc<ShardRing>,
    shards: Vec<RawConnection>,
}

impl ShardedConnection {
    /// Connect to every shard; sockets already opened are closed if a later one fails
    pub fn connect(ring: Arc<ShardRing>, factory: &ConnectionFactory) -> Result<Self, ConnectionError> {
        let shards = ring
            .endpoints()
            .iter()
            .map(|endpoint| factory.create(endpoint))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ring, shards })
    }

    pub fn ring(&self) -> &ShardRing {
        &self.ring
    }

    /// Connection that owns `key`
    pub fn shard(&mut self, key: &[u8]) -> &mut RawConnection {
        let idx = self.ring.shard_for(key);
        &mut self.shards[idx]
    }

    /// PING every shard
    pub fn ping_all(&mut self) -> Result<bool, ConnectionError> {
        for shard in &mut self.shards {
            if !shard.ping()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Commands for ShardedConnection {
    fn execute(&mut self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        match args.get(1) {
            Some(key) => self.shard(key).execute(args),
            // Keyless commands go to the first shard
            None => self.shards[0].execute(args),
        }
    }
}

//! A consistent hash ring implementation on a continuum of server nodes.
//!
//! The ring is a continuum of points, each labeled with a hash value and
//! owned by one server. A key is routed to the server owning the nearest
//! point at or below the key's CRC-32 hash. This keeps the impact of adding
//! or removing a server to roughly `1/N` of the stored keys: every server
//! contributes a large number of points distributed over the space
//! 0x00000000 - 0xFFFFFFFF, in proportion to its weight.

use sha1::{Digest, Sha1};

use crate::node::Node;

const POINTS_PER_SERVER: usize = 160;

struct Entry {
    hash: u32,
    node_index: usize,
}

pub(crate) struct Ring {
    pub(crate) nodes: Vec<Node>,
    continuum: Vec<Entry>,
}

impl Ring {
    /// Builds the ring. With fewer than two servers there is nothing to
    /// balance and the continuum is skipped entirely.
    pub(crate) fn new(nodes: Vec<Node>) -> Ring {
        let continuum = if nodes.len() >= 2 {
            build_continuum(&nodes)
        } else {
            Vec::new()
        };

        Ring { nodes, continuum }
    }

    /// Maps a key hash to the index of the owning node. The owner is the
    /// node whose point has the largest hash value not exceeding `hash`;
    /// keys hashing below the smallest point wrap to the *last* entry
    /// rather than the first. The rehash probe sequence depends on this.
    pub(crate) fn lookup(&self, hash: u32) -> usize {
        let idx = match self.continuum.binary_search_by(|e| e.hash.cmp(&hash)) {
            Ok(idx) => idx,
            Err(0) => self.continuum.len() - 1,
            Err(idx) => idx - 1,
        };
        self.continuum[idx].node_index
    }
}

/// CRC-32 of the effective key; this is the routing hash, distinct from the
/// SHA-1 used to place continuum points.
pub(crate) fn hash_for(key: &[u8]) -> u32 {
    crc32fast::hash(key)
}

fn build_continuum(nodes: &[Node]) -> Vec<Entry> {
    let total_weight: u64 = nodes.iter().map(|n| u64::from(n.weight())).sum();
    let mut continuum = Vec::new();

    for (node_index, node) in nodes.iter().enumerate() {
        // Each server gets points in proportion to its weight. The floor
        // division can leave the ring slightly under-populated, which is
        // accepted.
        let entry_count = (nodes.len() as u64 * POINTS_PER_SERVER as u64
            * u64::from(node.weight()))
            / total_weight;

        for point in 0..entry_count {
            let digest = Sha1::digest(format!("{}:{}", node.name(), point).as_bytes());
            let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
            continuum.push(Entry { hash, node_index });
        }
    }

    continuum.sort_unstable_by_key(|e| e.hash);
    continuum
}

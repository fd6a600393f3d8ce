//! Consistent hash ring of RPC node addresses
//!
//! The ring is immutable: adding or removing a node builds a new ring, which
//! the pool swaps in atomically. Each node owns `REPLICAS` points on the
//! ring so that removing a node only remaps the keys it owned.

use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Virtual points per node
const REPLICAS: usize = 40;

#[derive(Debug, Clone, Default)]
pub struct HashRing {
    /// Sorted by point
    points: Vec<(u64, Arc<str>)>,
    nodes: Vec<Arc<str>>,
}

fn hash_key(key: &[u8]) -> u64 {
    let digest = Sha256::digest(key);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

impl HashRing {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ring = HashRing::default();
        for node in nodes {
            ring.insert(node.as_ref());
        }
        ring.points.sort_unstable();
        ring
    }

    fn insert(&mut self, node: &str) {
        if self.contains(node) {
            return;
        }
        let node: Arc<str> = Arc::from(node);
        for i in 0..REPLICAS {
            let point = hash_key(format!("{}-{}", node, i).as_bytes());
            self.points.push((point, node.clone()));
        }
        self.nodes.push(node);
    }

    /// Node owning `key`: the first point clockwise from the key's hash
    pub fn get_node(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let h = hash_key(key.as_bytes());
        let idx = self.points.partition_point(|(p, _)| *p < h);
        let (_, node) = &self.points[idx % self.points.len()];
        Some(node.as_ref())
    }

    /// Returns a new ring that also contains `node`
    pub fn with_node(&self, node: &str) -> Self {
        let mut ring = self.clone();
        ring.insert(node);
        ring.points.sort_unstable();
        ring
    }

    /// Returns a new ring without `node`
    pub fn without_node(&self, node: &str) -> Self {
        HashRing {
            points: self
                .points
                .iter()
                .filter(|(_, n)| n.as_ref() != node)
                .cloned()
                .collect(),
            nodes: self
                .nodes
                .iter()
                .filter(|n| n.as_ref() != node)
                .cloned()
                .collect(),
        }
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n.as_ref() == node)
    }

    /// Member nodes in insertion order
    pub fn nodes(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

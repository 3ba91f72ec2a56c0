//! DHT node module
//!
//! Node identifiers and contacts of the key/value DHT.

use std::cmp::Ordering;
use std::net::SocketAddr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Length of a node id and of a key address, in bytes
pub const ID_LENGTH: usize = 20;

/// 160-bit identifier shared by nodes and stored keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; ID_LENGTH]);

impl NodeId {
    pub fn new(id: [u8; ID_LENGTH]) -> Self {
        Self(id)
    }

    /// Generate a random NodeId
    pub fn random() -> Self {
        use rand::Rng;
        let mut id = [0u8; ID_LENGTH];
        rand::thread_rng().fill(&mut id);
        Self(id)
    }

    /// Address of a stored key: SHA1 of its bytes
    pub fn for_key(key: &[u8]) -> Self {
        let digest = Sha1::digest(key);
        let mut id = [0u8; ID_LENGTH];
        id.copy_from_slice(&digest);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a NodeId from a hex string
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        let id: [u8; ID_LENGTH] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    /// XOR distance to another id
    pub fn distance(&self, other: &NodeId) -> [u8; ID_LENGTH] {
        let mut distance = [0u8; ID_LENGTH];
        for (i, d) in distance.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        distance
    }

    /// Order two ids by their distance to `self`
    pub fn cmp_distance(&self, a: &NodeId, b: &NodeId) -> Ordering {
        self.distance(a).cmp(&self.distance(b))
    }

    /// Index of the first differing bit, 159 when identical
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        for (byte, (ours, theirs)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let diff = ours ^ theirs;
            if diff != 0 {
                return byte * 8 + diff.leading_zeros() as usize;
            }
        }
        ID_LENGTH * 8 - 1
    }
}

/// A known contact
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    /// When the node last answered or queried us
    pub last_seen: Instant,
}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn update_last_seen(&mut self) {
        self.last_seen = Instant::now();
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

//! Torrent metadata structures
//!
//! Provides the immutable view of a decoded content descriptor.

use serde::Serialize;
use sha1::{Digest, Sha1};

/// A DHT bootstrap hint carried in the metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BootstrapNode {
    pub host: String,
    pub port: u16,
}

impl BootstrapNode {
    /// Create a new bootstrap node hint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `host:port` string
    pub fn parse(value: &str) -> Option<Self> {
        let (host, port) = value.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        if port == 0 {
            return None;
        }
        Some(Self::new(host, port))
    }
}

impl std::fmt::Display for BootstrapNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Decoded content descriptor
///
/// Built once from a byte buffer and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct TorrentMetadata {
    /// File names in descriptor order
    pub files: Vec<String>,
    /// DHT bootstrap hints from the top-level `nodes` list
    pub bootstrap_nodes: Vec<BootstrapNode>,
    /// Lowercase hex SHA1 of the canonical `info` encoding
    pub info_hash: String,
}

impl TorrentMetadata {
    /// Content hash as a hex string
    pub fn content_hash(&self) -> &str {
        &self.info_hash
    }

    /// Key under which holders of this content announce themselves
    pub fn dht_key(&self) -> Vec<u8> {
        self.info_hash.as_bytes().to_vec()
    }

    /// Number of files in the descriptor
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Check whether a name is part of the descriptor
    pub fn contains_file(&self, name: &str) -> bool {
        self.files.iter().any(|f| f == name)
    }

    /// Hex SHA1 of canonical info dictionary bytes
    pub fn generate_info_hash(info_dict_bytes: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(info_dict_bytes);
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_node_parse() {
        let node = BootstrapNode::parse("127.0.0.1:6881").unwrap();
        assert_eq!(node.host, "127.0.0.1");
        assert_eq!(node.port, 6881);
        assert_eq!(node.to_string(), "127.0.0.1:6881");
    }

    #[test]
    fn test_bootstrap_node_parse_invalid() {
        assert!(BootstrapNode::parse("no-port").is_none());
        assert!(BootstrapNode::parse(":6881").is_none());
        assert!(BootstrapNode::parse("host:0").is_none());
        assert!(BootstrapNode::parse("host:99999").is_none());
    }

    #[test]
    fn test_generate_info_hash() {
        // SHA1("abc")
        assert_eq!(
            TorrentMetadata::generate_info_hash(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_dht_key_is_hex_bytes() {
        let metadata = TorrentMetadata {
            files: vec!["a.txt".to_string()],
            bootstrap_nodes: Vec::new(),
            info_hash: "ab".repeat(20),
        };
        assert_eq!(metadata.dht_key(), "ab".repeat(20).into_bytes());
        assert!(metadata.contains_file("a.txt"));
        assert!(!metadata.contains_file("b.txt"));
        assert_eq!(metadata.file_count(), 1);
    }
}

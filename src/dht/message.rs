//! DHT message module
//!
//! Bencoded datagrams exchanged between DHT nodes. Ids, keys and values are
//! carried hex-encoded so every field is a plain bencode string.

use std::fmt;
use std::net::SocketAddr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::dht::node::{Node, NodeId};
use crate::error::TorrentError;

/// DHT query types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Ping,
    FindNode,
    Store,
    FindValue,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Ping => "ping",
            QueryType::FindNode => "find_node",
            QueryType::Store => "store",
            QueryType::FindValue => "find_value",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ping" => Some(QueryType::Ping),
            "find_node" => Some(QueryType::FindNode),
            "store" => Some(QueryType::Store),
            "find_value" => Some(QueryType::FindValue),
            _ => None,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message kind, the `y` field
pub const KIND_QUERY: &str = "q";
pub const KIND_RESPONSE: &str = "r";
pub const KIND_ERROR: &str = "e";

/// Contact carried in `find_node` / `find_value` responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub addr: String,
}

impl NodeInfo {
    pub fn from_node(node: &Node) -> Self {
        Self {
            id: node.id.to_hex(),
            addr: node.addr.to_string(),
        }
    }

    /// Back to a routing-table contact; `None` for malformed entries
    pub fn to_node(&self) -> Option<Node> {
        let id = NodeId::from_hex(&self.id)?;
        let addr: SocketAddr = self.addr.parse().ok()?;
        Some(Node::new(id, addr))
    }
}

/// One datagram
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhtMessage {
    /// Transaction id
    pub t: String,
    /// `q`, `r` or `e`
    pub y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// Sender id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<NodeInfo>>,
    /// Error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl DhtMessage {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_bencode::to_bytes(self)
            .map_err(|e| TorrentError::dht_unavailable_full("Failed to serialize DHT message", "local", e.to_string()).into())
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        serde_bencode::from_bytes(data)
            .map_err(|e| TorrentError::parse_error_with_source("Failed to deserialize DHT message", e.to_string()).into())
    }

    fn query(transaction_id: String, query_type: QueryType, our_id: NodeId) -> Self {
        Self {
            t: transaction_id,
            y: KIND_QUERY.to_string(),
            q: Some(query_type.as_str().to_string()),
            id: Some(our_id.to_hex()),
            ..Default::default()
        }
    }

    pub fn ping(transaction_id: String, our_id: NodeId) -> Self {
        Self::query(transaction_id, QueryType::Ping, our_id)
    }

    pub fn find_node(transaction_id: String, our_id: NodeId, target: NodeId) -> Self {
        Self {
            target: Some(target.to_hex()),
            ..Self::query(transaction_id, QueryType::FindNode, our_id)
        }
    }

    pub fn store(transaction_id: String, our_id: NodeId, key: &[u8], value: &[u8]) -> Self {
        Self {
            key: Some(hex::encode(key)),
            value: Some(hex::encode(value)),
            ..Self::query(transaction_id, QueryType::Store, our_id)
        }
    }

    pub fn find_value(transaction_id: String, our_id: NodeId, key: &[u8]) -> Self {
        Self {
            key: Some(hex::encode(key)),
            ..Self::query(transaction_id, QueryType::FindValue, our_id)
        }
    }

    /// Empty response to this query
    pub fn response(&self, our_id: NodeId) -> Self {
        Self {
            t: self.t.clone(),
            y: KIND_RESPONSE.to_string(),
            id: Some(our_id.to_hex()),
            ..Default::default()
        }
    }

    /// Error response to this query
    pub fn error(&self, our_id: NodeId, message: impl Into<String>) -> Self {
        Self {
            t: self.t.clone(),
            y: KIND_ERROR.to_string(),
            id: Some(our_id.to_hex()),
            e: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_nodes(mut self, nodes: &[Node]) -> Self {
        self.nodes = Some(nodes.iter().map(NodeInfo::from_node).collect());
        self
    }

    pub fn with_value(mut self, value: &[u8]) -> Self {
        self.value = Some(hex::encode(value));
        self
    }

    pub fn is_query(&self) -> bool {
        self.y == KIND_QUERY
    }

    pub fn query_type(&self) -> Option<QueryType> {
        self.q.as_deref().and_then(QueryType::parse)
    }

    pub fn sender_id(&self) -> Option<NodeId> {
        self.id.as_deref().and_then(NodeId::from_hex)
    }

    pub fn target_id(&self) -> Option<NodeId> {
        self.target.as_deref().and_then(NodeId::from_hex)
    }

    pub fn key_bytes(&self) -> Option<Vec<u8>> {
        self.key.as_deref().and_then(|k| hex::decode(k).ok())
    }

    pub fn value_bytes(&self) -> Option<Vec<u8>> {
        self.value.as_deref().and_then(|v| hex::decode(v).ok())
    }

    /// Well-formed contacts from the `nodes` field
    pub fn contacts(&self) -> Vec<Node> {
        self.nodes
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(NodeInfo::to_node)
            .collect()
    }
}

/// Random transaction id
pub fn generate_transaction_id() -> String {
    hex::encode(rand::random::<[u8; 4]>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_type_names() {
        for query in [QueryType::Ping, QueryType::FindNode, QueryType::Store, QueryType::FindValue] {
            assert_eq!(QueryType::parse(query.as_str()), Some(query));
        }
        assert_eq!(QueryType::parse("get_peers"), None);
    }

    #[test]
    fn test_store_query_fields() {
        let our_id = NodeId::new([7; 20]);
        let msg = DhtMessage::store("aa".to_string(), our_id, b"key", b"127.0.0.1:6881");
        let decoded = DhtMessage::deserialize(&msg.serialize().unwrap()).unwrap();
        assert!(decoded.is_query());
        assert_eq!(decoded.query_type(), Some(QueryType::Store));
        assert_eq!(decoded.sender_id(), Some(our_id));
        assert_eq!(decoded.key_bytes().unwrap(), b"key");
        assert_eq!(decoded.value_bytes().unwrap(), b"127.0.0.1:6881");
    }

    #[test]
    fn test_response_with_nodes() {
        let query = DhtMessage::find_node("01".to_string(), NodeId::new([1; 20]), NodeId::new([2; 20]));
        let contact = Node::new(NodeId::new([3; 20]), "127.0.0.1:7000".parse().unwrap());
        let response = query.response(NodeId::new([9; 20])).with_nodes(&[contact.clone()]);

        let decoded = DhtMessage::deserialize(&response.serialize().unwrap()).unwrap();
        assert_eq!(decoded.t, "01");
        assert!(!decoded.is_query());
        let contacts = decoded.contacts();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, contact.id);
        assert_eq!(contacts[0].addr, contact.addr);
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let ping = DhtMessage::ping("01".to_string(), NodeId::new([1; 20]));
        let bytes = ping.serialize().unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("target"));
        assert!(!text.contains("nodes"));
    }

    #[test]
    fn test_malformed_contacts_are_dropped() {
        let msg = DhtMessage {
            nodes: Some(vec![
                NodeInfo { id: "zz".to_string(), addr: "127.0.0.1:1".to_string() },
                NodeInfo { id: "01".repeat(20), addr: "not an addr".to_string() },
            ]),
            ..Default::default()
        };
        assert!(msg.contacts().is_empty());
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(DhtMessage::deserialize(b"not bencode").is_err());
    }
}

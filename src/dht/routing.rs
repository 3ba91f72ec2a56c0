//! DHT routing table module
//!
//! Kademlia routing table: one bucket of up to `K` contacts per shared-prefix
//! length with our id.

use crate::dht::node::{Node, NodeId, ID_LENGTH};

/// Contacts per bucket, and the replication factor for stores
pub const K: usize = 8;

const BUCKET_COUNT: usize = ID_LENGTH * 8;

/// A bucket in the routing table
#[derive(Debug, Clone, Default)]
pub struct KBucket {
    /// Least recently seen first
    pub nodes: Vec<Node>,
}

impl KBucket {
    /// Add or refresh a contact; a full bucket keeps its existing contacts
    pub fn add_node(&mut self, node: Node) -> bool {
        if let Some(pos) = self.nodes.iter().position(|n| n.id == node.id) {
            let mut existing = self.nodes.remove(pos);
            existing.addr = node.addr;
            existing.update_last_seen();
            self.nodes.push(existing);
            return true;
        }

        if self.nodes.len() >= K {
            return false;
        }

        self.nodes.push(node);
        true
    }

    pub fn remove_node(&mut self, id: &NodeId) {
        self.nodes.retain(|n| n.id != *id);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= K
    }
}

/// Kademlia routing table
#[derive(Debug)]
pub struct RoutingTable {
    pub our_id: NodeId,
    pub buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(our_id: NodeId) -> Self {
        Self {
            our_id,
            buckets: vec![KBucket::default(); BUCKET_COUNT],
        }
    }

    /// Add a contact; our own id is never stored
    pub fn add_node(&mut self, node: Node) -> bool {
        if node.id == self.our_id {
            return false;
        }
        let index = self.our_id.bucket_index(&node.id);
        self.buckets[index].add_node(node)
    }

    pub fn remove_node(&mut self, id: &NodeId) {
        let index = self.our_id.bucket_index(id);
        self.buckets[index].remove_node(id);
    }

    /// Up to `count` contacts sorted by XOR distance to `target`
    pub fn find_closest_nodes(&self, target: &NodeId, count: usize) -> Vec<Node> {
        let mut all_nodes = self.get_nodes();
        all_nodes.sort_by(|a, b| target.cmp_distance(&a.id, &b.id));
        all_nodes.truncate(count);
        all_nodes
    }

    pub fn get_nodes(&self) -> Vec<Node> {
        self.buckets.iter().flat_map(|b| b.nodes.iter().cloned()).collect()
    }

    pub fn find_node(&self, id: &NodeId) -> Option<&Node> {
        let index = self.our_id.bucket_index(id);
        self.buckets[index].nodes.iter().find(|n| n.id == *id)
    }

    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(first: u8, last: u8, port: u16) -> Node {
        let mut id = [first; ID_LENGTH];
        id[ID_LENGTH - 1] = last;
        Node::new(NodeId::new(id), format!("127.0.0.1:{}", port).parse().unwrap())
    }

    #[test]
    fn test_routing_table_new() {
        let table = RoutingTable::new(NodeId::new([1; ID_LENGTH]));
        assert_eq!(table.buckets.len(), 160);
        assert_eq!(table.node_count(), 0);
    }

    #[test]
    fn test_add_and_remove() {
        let mut table = RoutingTable::new(NodeId::new([1; ID_LENGTH]));
        let contact = node(2, 2, 6881);
        assert!(table.add_node(contact.clone()));
        assert!(table.find_node(&contact.id).is_some());
        table.remove_node(&contact.id);
        assert_eq!(table.node_count(), 0);
    }

    #[test]
    fn test_own_id_is_not_stored() {
        let our_id = NodeId::new([1; ID_LENGTH]);
        let mut table = RoutingTable::new(our_id);
        assert!(!table.add_node(Node::new(our_id, "127.0.0.1:1".parse().unwrap())));
        assert_eq!(table.node_count(), 0);
    }

    #[test]
    fn test_refresh_updates_address() {
        let mut table = RoutingTable::new(NodeId::new([1; ID_LENGTH]));
        table.add_node(node(2, 2, 6881));
        table.add_node(node(2, 2, 7000));
        assert_eq!(table.node_count(), 1);
        assert_eq!(table.get_nodes()[0].addr.port(), 7000);
    }

    #[test]
    fn test_bucket_full() {
        let mut bucket = KBucket::default();
        for i in 0..K {
            assert!(bucket.add_node(node(2, i as u8, 6881 + i as u16)));
        }
        assert!(bucket.is_full());
        assert!(!bucket.add_node(node(2, K as u8, 7000)));
        // Known contacts are still refreshed
        assert!(bucket.add_node(node(2, 0, 6881)));
    }

    #[test]
    fn test_find_closest_nodes_sorted() {
        let mut table = RoutingTable::new(NodeId::new([0; ID_LENGTH]));
        table.add_node(Node::new(NodeId::new([0xF0; ID_LENGTH]), "127.0.0.1:6881".parse().unwrap()));
        table.add_node(Node::new(NodeId::new([0x0F; ID_LENGTH]), "127.0.0.1:6882".parse().unwrap()));
        table.add_node(Node::new(NodeId::new([0xFF; ID_LENGTH]), "127.0.0.1:6883".parse().unwrap()));

        let closest = table.find_closest_nodes(&NodeId::new([0xFF; ID_LENGTH]), K);
        let ids: Vec<NodeId> = closest.iter().map(|n| n.id).collect();
        assert_eq!(
            ids,
            vec![
                NodeId::new([0xFF; ID_LENGTH]),
                NodeId::new([0xF0; ID_LENGTH]),
                NodeId::new([0x0F; ID_LENGTH]),
            ]
        );
        assert_eq!(table.find_closest_nodes(&NodeId::new([0xFF; ID_LENGTH]), 1).len(), 1);
    }
}

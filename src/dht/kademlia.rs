//! Kademlia key/value node
//!
//! A small UDP DHT: `ping`, `find_node`, `store` and `find_value` over
//! bencoded datagrams, a 160-bucket routing table, and a last-write-wins
//! local value store. Stored keys live at `SHA1(key)` in the id space.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, trace, warn};

use crate::dht::facade::Dht;
use crate::dht::message::{generate_transaction_id, DhtMessage, QueryType, KIND_ERROR};
use crate::dht::node::{Node, NodeId};
use crate::dht::routing::{RoutingTable, K};
use crate::error::TorrentError;
use crate::torrent::BootstrapNode;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Parallel requests per lookup round
const ALPHA: usize = 3;

const MAX_LOOKUP_ROUNDS: usize = 4;

const MAX_DATAGRAM: usize = 8192;

/// Outcome of an iterative lookup
struct Lookup {
    nodes: Vec<Node>,
    value: Option<Vec<u8>>,
}

/// State shared by the receive loop and the public operations
struct Core {
    id: NodeId,
    socket: UdpSocket,
    local_addr: SocketAddr,
    routing: RwLock<RoutingTable>,
    store: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<DhtMessage>>>,
}

impl Core {
    async fn recv_loop(self: Arc<Self>) {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, from)) => self.handle_datagram(&buffer[..len], from).await,
                Err(e) => warn!("Error receiving DHT datagram: {}", e),
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let message = match DhtMessage::deserialize(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping malformed datagram from {}: {}", from, e);
                return;
            }
        };

        if let Some(sender) = message.sender_id() {
            self.routing.write().await.add_node(Node::new(sender, from));
        }

        if message.is_query() {
            if let Err(e) = self.answer(&message, from).await {
                warn!("Failed to answer {:?} query from {}: {}", message.q, from, e);
            }
            return;
        }

        match self.pending.lock().await.remove(&message.t) {
            Some(waiter) => {
                let _ = waiter.send(message);
            }
            None => trace!("Unsolicited response {} from {}", message.t, from),
        }
    }

    async fn answer(&self, query: &DhtMessage, from: SocketAddr) -> Result<()> {
        let response = match query.query_type() {
            Some(QueryType::Ping) => query.response(self.id),
            Some(QueryType::FindNode) => match query.target_id() {
                Some(target) => query.response(self.id).with_nodes(&self.closest(&target).await),
                None => query.error(self.id, "find_node without target"),
            },
            Some(QueryType::Store) => match (query.key_bytes(), query.value_bytes()) {
                (Some(key), Some(value)) => {
                    debug!("Storing {} bytes for {} at {}'s request", value.len(), hex::encode(&key), from);
                    self.store.write().await.insert(key, value);
                    query.response(self.id)
                }
                _ => query.error(self.id, "store without key or value"),
            },
            Some(QueryType::FindValue) => match query.key_bytes() {
                Some(key) => {
                    let stored = self.store.read().await.get(&key).cloned();
                    match stored {
                        Some(value) => query.response(self.id).with_value(&value),
                        None => query
                            .response(self.id)
                            .with_nodes(&self.closest(&NodeId::for_key(&key)).await),
                    }
                }
                None => query.error(self.id, "find_value without key"),
            },
            None => query.error(self.id, "unknown query"),
        };
        trace!("Answering {:?} from {}", query.q, from);
        self.send(&response, from).await
    }

    async fn closest(&self, target: &NodeId) -> Vec<Node> {
        self.routing.read().await.find_closest_nodes(target, K)
    }

    async fn send(&self, message: &DhtMessage, to: SocketAddr) -> Result<()> {
        let data = message.serialize()?;
        self.socket.send_to(&data, to).await.map_err(|e| {
            TorrentError::dht_unavailable_full("Failed to send DHT datagram", to.to_string(), e.to_string())
        })?;
        Ok(())
    }

    /// Send a query and wait for the matching response
    async fn request(&self, to: SocketAddr, query: DhtMessage) -> Result<DhtMessage> {
        let transaction = query.t.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(transaction.clone(), tx);

        if let Err(e) = self.send(&query, to).await {
            self.pending.lock().await.remove(&transaction);
            return Err(e);
        }

        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) if response.y == KIND_ERROR => Err(TorrentError::dht_unavailable_full(
                "DHT node returned an error",
                to.to_string(),
                response.e.unwrap_or_default(),
            )
            .into()),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TorrentError::dht_unavailable_full("Request dropped", to.to_string(), transaction).into()),
            Err(e) => {
                self.pending.lock().await.remove(&transaction);
                Err(TorrentError::dht_unavailable_full("DHT request timed out", to.to_string(), e.to_string()).into())
            }
        }
    }

    /// Whether `addr` is this node's own socket
    fn is_self(&self, addr: SocketAddr) -> bool {
        if addr == self.local_addr {
            return true;
        }
        let local_ip = self.local_addr.ip();
        addr.port() == self.local_addr.port()
            && (addr.ip().is_loopback() || addr.ip().is_unspecified())
            && (local_ip.is_loopback() || local_ip.is_unspecified())
    }

    /// Iterative lookup towards `target`; with a key, stops at the first value
    async fn lookup(self: &Arc<Self>, target: NodeId, key: Option<&[u8]>) -> Lookup {
        let mut shortlist = self.closest(&target).await;
        let mut queried: HashSet<NodeId> = HashSet::new();

        for round in 0..MAX_LOOKUP_ROUNDS {
            let batch: Vec<Node> = shortlist
                .iter()
                .filter(|n| !queried.contains(&n.id))
                .take(ALPHA)
                .cloned()
                .collect();
            if batch.is_empty() {
                break;
            }
            trace!("Lookup round {} for {} queries {} nodes", round, target.to_hex(), batch.len());

            let mut requests = JoinSet::new();
            for node in batch {
                queried.insert(node.id);
                let query = match key {
                    Some(key) => DhtMessage::find_value(generate_transaction_id(), self.id, key),
                    None => DhtMessage::find_node(generate_transaction_id(), self.id, target),
                };
                let core = self.clone();
                requests.spawn(async move {
                    let result = core.request(node.addr, query).await;
                    (node, result)
                });
            }

            while let Some(joined) = requests.join_next().await {
                let Ok((node, result)) = joined else {
                    continue;
                };
                match result {
                    Ok(response) => {
                        if key.is_some() {
                            if let Some(value) = response.value_bytes() {
                                debug!("Found value at {}", node.addr);
                                return Lookup {
                                    nodes: shortlist,
                                    value: Some(value),
                                };
                            }
                        }
                        for contact in response.contacts() {
                            if contact.id == self.id || self.is_self(contact.addr) {
                                continue;
                            }
                            self.routing.write().await.add_node(contact.clone());
                            if !shortlist.iter().any(|n| n.id == contact.id) {
                                shortlist.push(contact);
                            }
                        }
                    }
                    Err(e) => {
                        debug!("Lookup query to {} failed: {}", node.addr, e);
                        shortlist.retain(|n| n.id != node.id);
                        self.routing.write().await.remove_node(&node.id);
                    }
                }
            }

            shortlist.sort_by(|a, b| target.cmp_distance(&a.id, &b.id));
            shortlist.truncate(K);
        }

        Lookup {
            nodes: shortlist,
            value: None,
        }
    }
}

/// UDP Kademlia node implementing the [`Dht`] facade
pub struct KademliaDht {
    id: NodeId,
    core: OnceLock<Arc<Core>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl KademliaDht {
    /// Create a node with a random id; it does nothing until `listen`
    pub fn new() -> Self {
        Self::with_id(NodeId::random())
    }

    pub fn with_id(id: NodeId) -> Self {
        Self {
            id,
            core: OnceLock::new(),
            recv_task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn core(&self) -> Result<Arc<Core>> {
        self.core
            .get()
            .cloned()
            .ok_or_else(|| TorrentError::dht_unavailable("DHT node is not listening").into())
    }

    /// Contacts in the routing table
    pub async fn node_count(&self) -> usize {
        match self.core.get() {
            Some(core) => core.routing.read().await.node_count(),
            None => 0,
        }
    }
}

impl Default for KademliaDht {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dht for KademliaDht {
    async fn listen(&self, port: u16, host: &str) -> Result<()> {
        if self.core.get().is_some() {
            return Err(TorrentError::dht_unavailable("DHT node is already listening").into());
        }

        let socket = UdpSocket::bind((host, port)).await.map_err(|e| {
            error!("Failed to bind DHT socket on {}:{}: {}", host, port, e);
            TorrentError::dht_unavailable_full("Failed to bind DHT socket", format!("{}:{}", host, port), e.to_string())
        })?;
        let local_addr = socket.local_addr()?;

        let core = Arc::new(Core {
            id: self.id,
            socket,
            local_addr,
            routing: RwLock::new(RoutingTable::new(self.id)),
            store: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        });
        if self.core.set(core.clone()).is_err() {
            return Err(TorrentError::dht_unavailable("DHT node is already listening").into());
        }

        *self.recv_task.lock().await = Some(tokio::spawn(core.recv_loop()));
        info!("DHT node {} listening on {}", self.id.to_hex(), local_addr);
        Ok(())
    }

    async fn bootstrap(&self, nodes: &[BootstrapNode]) -> Result<usize> {
        let core = self.core()?;
        info!("Bootstrapping DHT from {} nodes", nodes.len());

        let mut reachable = 0;
        for seed in nodes {
            let resolved: Vec<SocketAddr> = match lookup_host((seed.host.as_str(), seed.port)).await {
                Ok(addrs) => addrs.collect(),
                Err(e) => {
                    warn!("Could not resolve bootstrap node {}: {}", seed, e);
                    continue;
                }
            };
            let Some(addr) = resolved
                .into_iter()
                .find(|a| a.is_ipv4() == core.local_addr.is_ipv4())
            else {
                warn!("No usable address for bootstrap node {}", seed);
                continue;
            };
            if core.is_self(addr) {
                debug!("Skipping own address {} in bootstrap list", addr);
                continue;
            }

            match core.request(addr, DhtMessage::ping(generate_transaction_id(), core.id)).await {
                Ok(_) => {
                    debug!("Bootstrap node {} answered", addr);
                    reachable += 1;
                }
                Err(e) => warn!("Bootstrap node {} unreachable: {}", addr, e),
            }
        }

        if reachable > 0 {
            let lookup = core.lookup(core.id, None).await;
            debug!("Self lookup returned {} nodes", lookup.nodes.len());
        }

        info!(
            "DHT bootstrap finished: {} of {} nodes reachable, {} known contacts",
            reachable,
            nodes.len(),
            core.routing.read().await.node_count()
        );
        Ok(reachable)
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let core = self.core()?;
        core.store.write().await.insert(key.to_vec(), value.to_vec());

        let lookup = core.lookup(NodeId::for_key(key), None).await;
        let targets = lookup.nodes.len();

        let mut requests = JoinSet::new();
        for node in lookup.nodes {
            let core = core.clone();
            let query = DhtMessage::store(generate_transaction_id(), core.id, key, value);
            requests.spawn(async move { (node.addr, core.request(node.addr, query).await) });
        }

        let mut replicated = 0;
        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok((_, Ok(_))) => replicated += 1,
                Ok((addr, Err(e))) => debug!("Store on {} failed: {}", addr, e),
                Err(e) => debug!("Store task failed: {}", e),
            }
        }

        debug!("Stored {} on {} of {} remote nodes", hex::encode(key), replicated, targets);
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let core = self.core()?;
        if let Some(value) = core.store.read().await.get(key).cloned() {
            trace!("Local hit for {}", hex::encode(key));
            return Ok(Some(value));
        }

        let lookup = core.lookup(NodeId::for_key(key), Some(key)).await;
        if lookup.value.is_none() {
            debug!("No value for {} after asking {} nodes", hex::encode(key), lookup.nodes.len());
        }
        Ok(lookup.value)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.core.get().map(|core| core.local_addr)
    }

    async fn stop(&self) {
        if let Some(task) = self.recv_task.lock().await.take() {
            task.abort();
            let _ = task.await;
            if let Some(core) = self.core.get() {
                core.pending.lock().await.clear();
            }
            info!("DHT node {} stopped", self.id.to_hex());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn listening() -> KademliaDht {
        let dht = KademliaDht::new();
        dht.listen(0, "127.0.0.1").await.unwrap();
        dht
    }

    fn seed_of(dht: &KademliaDht) -> BootstrapNode {
        BootstrapNode::new("127.0.0.1", dht.local_addr().unwrap().port())
    }

    #[tokio::test]
    async fn test_operations_require_listen() {
        let dht = KademliaDht::new();
        assert!(dht.local_addr().is_none());
        assert!(dht.get(b"key").await.is_err());
        assert!(dht.set(b"key", b"value").await.is_err());
    }

    #[tokio::test]
    async fn test_listen_twice_fails() {
        let dht = listening().await;
        assert!(dht.listen(0, "127.0.0.1").await.is_err());
        dht.stop().await;
    }

    #[tokio::test]
    async fn test_local_set_then_get() {
        let dht = listening().await;
        dht.set(b"key", b"127.0.0.1:6881").await.unwrap();
        assert_eq!(dht.get(b"key").await.unwrap(), Some(b"127.0.0.1:6881".to_vec()));
        dht.stop().await;
    }

    #[tokio::test]
    async fn test_two_nodes_set_and_get() {
        let seeder = listening().await;
        let client = listening().await;

        // Value published before the client joins is found with find_value
        seeder.set(b"content", b"127.0.0.1:6881").await.unwrap();
        assert_eq!(client.bootstrap(&[seed_of(&seeder)]).await.unwrap(), 1);
        assert_eq!(client.node_count().await, 1);
        assert_eq!(seeder.node_count().await, 1);
        assert_eq!(client.get(b"content").await.unwrap(), Some(b"127.0.0.1:6881".to_vec()));

        // Later writes replicate to known nodes and replace the old value
        client.set(b"content", b"127.0.0.1:6882").await.unwrap();
        assert_eq!(seeder.get(b"content").await.unwrap(), Some(b"127.0.0.1:6882".to_vec()));

        assert_eq!(client.get(b"missing").await.unwrap(), None);

        seeder.stop().await;
        client.stop().await;
    }

    #[tokio::test]
    async fn test_bootstrap_skips_self_and_dead_nodes() {
        let dht = listening().await;
        let dead = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let reachable = dht
            .bootstrap(&[seed_of(&dht), BootstrapNode::new("127.0.0.1", dead_port)])
            .await
            .unwrap();
        assert_eq!(reachable, 0);
        assert_eq!(dht.node_count().await, 0);
        dht.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_query_gets_error() {
        let dht = listening().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let query = DhtMessage {
            t: "ab".to_string(),
            y: "q".to_string(),
            q: Some("get_peers".to_string()),
            ..Default::default()
        };
        socket.send_to(&query.serialize().unwrap(), dht.local_addr().unwrap()).await.unwrap();

        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer)).await.unwrap().unwrap();
        let reply = DhtMessage::deserialize(&buffer[..len]).unwrap();
        assert_eq!(reply.t, "ab");
        assert_eq!(reply.y, KIND_ERROR);
        dht.stop().await;
    }
}

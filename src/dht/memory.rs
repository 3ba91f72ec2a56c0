//! In-process DHT
//!
//! Every handle created from the same network shares one map, so several
//! nodes in one process see each other's announcements immediately.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::dht::facade::Dht;
use crate::torrent::BootstrapNode;

type Network = Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>;

/// Handle onto a shared in-memory key/value network
#[derive(Debug, Default)]
pub struct InMemoryDht {
    network: Network,
    local_addr: OnceLock<SocketAddr>,
}

impl InMemoryDht {
    /// Start a new, empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Another node on the same network
    pub fn join(&self) -> Self {
        Self {
            network: self.network.clone(),
            local_addr: OnceLock::new(),
        }
    }

    /// Number of keys stored on the network
    pub async fn len(&self) -> usize {
        self.network.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.network.read().await.is_empty()
    }
}

#[async_trait]
impl Dht for InMemoryDht {
    async fn listen(&self, port: u16, host: &str) -> Result<()> {
        if let Ok(addr) = format!("{}:{}", host, port).parse::<SocketAddr>() {
            let _ = self.local_addr.set(addr);
        }
        debug!("In-memory DHT node listening as {}:{}", host, port);
        Ok(())
    }

    async fn bootstrap(&self, nodes: &[BootstrapNode]) -> Result<usize> {
        trace!("In-memory DHT ignores {} bootstrap nodes", nodes.len());
        Ok(nodes.len())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.network.write().await.insert(key.to_vec(), value.to_vec());
        trace!("Stored {} bytes under {}", value.len(), String::from_utf8_lossy(key));
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.network.read().await.get(key).cloned())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    async fn stop(&self) {
        debug!("In-memory DHT node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handles_share_the_network() {
        let first = InMemoryDht::new();
        let second = first.join();

        assert_eq!(second.get(b"key").await.unwrap(), None);
        first.set(b"key", b"127.0.0.1:6881").await.unwrap();
        assert_eq!(second.get(b"key").await.unwrap(), Some(b"127.0.0.1:6881".to_vec()));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let dht = InMemoryDht::new();
        dht.set(b"key", b"a:1").await.unwrap();
        dht.set(b"key", b"b:2").await.unwrap();
        assert_eq!(dht.get(b"key").await.unwrap(), Some(b"b:2".to_vec()));
        assert_eq!(dht.len().await, 1);
    }

    #[tokio::test]
    async fn test_listen_records_address() {
        let dht = InMemoryDht::new();
        assert!(dht.local_addr().is_none());
        dht.listen(7000, "127.0.0.1").await.unwrap();
        assert_eq!(dht.local_addr(), Some("127.0.0.1:7000".parse().unwrap()));
        assert!(dht.join().local_addr().is_none());
    }
}

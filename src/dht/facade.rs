//! DHT facade
//!
//! The narrow key/value surface the node needs from a DHT.

use std::net::SocketAddr;

use anyhow::Result;
use async_trait::async_trait;

use crate::torrent::BootstrapNode;

/// Single-value distributed key/value store
///
/// `get` returns the most recently observed value for a key, not a set of
/// announcers.
#[async_trait]
pub trait Dht: Send + Sync {
    /// Start participating on `host:port`
    async fn listen(&self, port: u16, host: &str) -> Result<()>;

    /// Contact seed nodes; returns how many answered
    async fn bootstrap(&self, nodes: &[BootstrapNode]) -> Result<usize>;

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Bound address once listening
    fn local_addr(&self) -> Option<SocketAddr>;

    async fn stop(&self);
}

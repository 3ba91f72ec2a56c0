//! Peer addresses
//!
//! Addresses travel through the DHT as UTF-8 `host:port` strings.

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::TorrentError;

/// Host names that always refer to this machine
const LOCAL_ALIASES: [&str; 4] = ["0.0.0.0", "127.0.0.1", "::1", "localhost"];

/// Where a node accepts wire connections
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `host:port` string; IPv6 hosts may be bracketed
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| TorrentError::parse_error(format!("Peer address without port: {:?}", value)))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(TorrentError::parse_error(format!("Peer address without host: {:?}", value)).into());
        }

        let port: u16 = port
            .parse()
            .map_err(|_| TorrentError::parse_error(format!("Invalid port in peer address: {:?}", value)))?;
        if port == 0 {
            return Err(TorrentError::parse_error(format!("Port 0 in peer address: {:?}", value)).into());
        }

        Ok(Self::new(host, port))
    }

    /// Parse the raw bytes of a DHT value
    pub fn from_dht_value(value: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(value)
            .map_err(|e| TorrentError::parse_error_with_source("Peer address is not UTF-8", e.to_string()))?;
        Self::parse(text)
    }

    /// Bytes published in the DHT
    pub fn to_dht_value(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Whether this address names the node listening at `local`
    ///
    /// Generic local names count as the same host when the ports match.
    pub fn refers_to(&self, local: &PeerAddress) -> bool {
        if self.port != local.port {
            return false;
        }
        self.host.eq_ignore_ascii_case(&local.host) || is_local_alias(&self.host)
    }
}

fn is_local_alias(host: &str) -> bool {
    LOCAL_ALIASES.iter().any(|alias| alias.eq_ignore_ascii_case(host))
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

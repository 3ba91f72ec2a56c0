//! Error types for the file swarm
//!
//! Every failure a node can hit is classified into one of these variants.
//! Only configuration errors at startup are fatal; the others abort a single
//! connection, session or discovery cycle.

use std::fmt;

/// Error type for swarm operations
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// Metadata buffer could not be decoded
    ParseError {
        message: String,
        source: Option<String>,
    },

    /// Unexpected content on a protocol control line
    ProtocolViolation {
        message: String,
        peer: Option<String>,
    },

    /// Peer closed or sent fewer bytes than it declared
    TransferIncomplete {
        message: String,
        peer: Option<String>,
        expected: u64,
        received: u64,
    },

    /// Refused or timed-out connection to a bootstrap server or peer
    ConnectivityError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Failure reported by the DHT facade
    DhtUnavailable {
        message: String,
        node: Option<String>,
        source: Option<String>,
    },

    /// Missing resources or invalid settings at startup
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Local disk failures while persisting data
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },
}

impl TorrentError {
    /// Create a new ParseError
    pub fn parse_error(message: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ParseError with source
    pub fn parse_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new ProtocolViolation
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        TorrentError::ProtocolViolation {
            message: message.into(),
            peer: None,
        }
    }

    /// Create a new ProtocolViolation attributed to a peer
    pub fn protocol_violation_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::ProtocolViolation {
            message: message.into(),
            peer: Some(peer.into()),
        }
    }

    /// Create a new TransferIncomplete
    pub fn transfer_incomplete(
        message: impl Into<String>,
        peer: impl Into<String>,
        expected: u64,
        received: u64,
    ) -> Self {
        TorrentError::TransferIncomplete {
            message: message.into(),
            peer: Some(peer.into()),
            expected,
            received,
        }
    }

    /// Create a new ConnectivityError with address
    pub fn connectivity_error_with_address(message: impl Into<String>, address: impl Into<String>) -> Self {
        TorrentError::ConnectivityError {
            message: message.into(),
            address: Some(address.into()),
            source: None,
        }
    }

    /// Create a new ConnectivityError with address and source
    pub fn connectivity_error_full(
        message: impl Into<String>,
        address: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::ConnectivityError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new DhtUnavailable
    pub fn dht_unavailable(message: impl Into<String>) -> Self {
        TorrentError::DhtUnavailable {
            message: message.into(),
            node: None,
            source: None,
        }
    }

    /// Create a new DhtUnavailable with node and source
    pub fn dht_unavailable_full(
        message: impl Into<String>,
        node: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::DhtUnavailable {
            message: message.into(),
            node: Some(node.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ConfigError
    pub fn config_error(message: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Whether the error is fatal for node startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, TorrentError::ConfigError { .. })
    }
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::ParseError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Parse error: {} (source: {})", message, src)
                } else {
                    write!(f, "Parse error: {}", message)
                }
            }
            TorrentError::ProtocolViolation { message, peer } => {
                if let Some(p) = peer {
                    write!(f, "Protocol violation: {} (peer: {})", message, p)
                } else {
                    write!(f, "Protocol violation: {}", message)
                }
            }
            TorrentError::TransferIncomplete { message, peer, expected, received } => {
                match peer {
                    Some(p) => write!(
                        f,
                        "Transfer incomplete: {} (peer: {}, received {}/{} bytes)",
                        message, p, received, expected
                    ),
                    None => write!(f, "Transfer incomplete: {} (received {}/{} bytes)", message, received, expected),
                }
            }
            TorrentError::ConnectivityError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, "Connectivity error: {} (address: {}, source: {})", message, a, s),
                    (Some(a), None) => write!(f, "Connectivity error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Connectivity error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Connectivity error: {}", message),
                }
            }
            TorrentError::DhtUnavailable { message, node, source } => {
                match (node, source) {
                    (Some(n), Some(s)) => write!(f, "DHT unavailable: {} (node: {}, source: {})", message, n, s),
                    (Some(n), None) => write!(f, "DHT unavailable: {} (node: {})", message, n),
                    (None, Some(s)) => write!(f, "DHT unavailable: {} (source: {})", message, s),
                    (None, None) => write!(f, "DHT unavailable: {}", message),
                }
            }
            TorrentError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            TorrentError::StorageError { message, path, source } => {
                match (path, source) {
                    (Some(p), Some(s)) => write!(f, "Storage error: {} (path: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Storage error: {} (path: {})", message, p),
                    (None, Some(s)) => write!(f, "Storage error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Storage error: {}", message),
                }
            }
        }
    }
}

impl std::error::Error for TorrentError {}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        TorrentError::storage_error_full(err.to_string(), "unknown".to_string(), err.kind().to_string())
    }
}

impl From<serde_bencode::Error> for TorrentError {
    fn from(err: serde_bencode::Error) -> Self {
        TorrentError::parse_error_with_source("Failed to parse bencode data", err.to_string())
    }
}

impl From<std::net::AddrParseError> for TorrentError {
    fn from(err: std::net::AddrParseError) -> Self {
        TorrentError::connectivity_error_full("Failed to parse address", "unknown".to_string(), err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TorrentError {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        TorrentError::ConnectivityError {
            message: "Operation timed out".to_string(),
            address: None,
            source: None,
        }
    }
}

/// Find the first `TorrentError` in an `anyhow` chain
pub fn classify(err: &anyhow::Error) -> Option<&TorrentError> {
    err.chain().find_map(|cause| cause.downcast_ref::<TorrentError>())
}

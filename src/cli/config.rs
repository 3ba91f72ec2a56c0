//! Node configuration module
//!
//! Everything a node needs to start, built from CLI arguments or directly
//! in code.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::cli::args::{DownloadArgs, NetworkArgs, SeedArgs};
use crate::error::TorrentError;
use crate::peer::PeerAddress;
use crate::torrent::BootstrapNode;

pub const DEFAULT_SEEDER_PORT: u16 = 6881;
pub const DEFAULT_CLIENT_PORT: u16 = 6882;
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);

/// Whether the node starts with the full file set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Seeder,
    Client,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: NodeRole,
    /// Seeder: metadata to load. Client: where the fetched metadata is saved.
    pub torrent_path: PathBuf,
    /// Seeder only
    pub seed_dir: PathBuf,
    /// Client only
    pub download_dir: PathBuf,
    /// Client only
    pub bootstrap_server: Option<PeerAddress>,
    pub listen_host: String,
    /// Shared by the DHT socket and the peer server; 0 picks free ports
    pub listen_port: u16,
    pub advertise_host: String,
    /// DHT seeds added to the ones carried in the metadata
    pub extra_bootstrap_nodes: Vec<BootstrapNode>,
    pub discovery_interval: Duration,
}

impl NodeConfig {
    /// Seeder serving `seed_dir` on the default seeder port
    pub fn seeder(torrent_path: impl Into<PathBuf>, seed_dir: impl Into<PathBuf>) -> Self {
        Self {
            role: NodeRole::Seeder,
            torrent_path: torrent_path.into(),
            seed_dir: seed_dir.into(),
            download_dir: PathBuf::from("downloads"),
            bootstrap_server: None,
            listen_host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_SEEDER_PORT,
            advertise_host: "127.0.0.1".to_string(),
            extra_bootstrap_nodes: Vec::new(),
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
        }
    }

    /// Client fetching the metadata from `bootstrap_server`
    pub fn client(bootstrap_server: PeerAddress, torrent_path: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            role: NodeRole::Client,
            torrent_path: torrent_path.into(),
            seed_dir: PathBuf::new(),
            download_dir: download_dir.into(),
            bootstrap_server: Some(bootstrap_server),
            listen_port: DEFAULT_CLIENT_PORT,
            ..Self::seeder(PathBuf::new(), PathBuf::new())
        }
    }

    /// Bind host and port; the advertised host follows unless the bind is a wildcard
    pub fn with_listen(mut self, host: impl Into<String>, port: u16) -> Self {
        self.listen_host = host.into();
        self.listen_port = port;
        self.advertise_host = default_advertise_host(&self.listen_host);
        self
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = host.into();
        self
    }

    pub fn with_bootstrap_nodes(mut self, nodes: Vec<BootstrapNode>) -> Self {
        self.extra_bootstrap_nodes = nodes;
        self
    }

    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    pub fn from_seed_args(args: &SeedArgs) -> Result<Self> {
        let config = Self::seeder(args.torrent.clone(), args.seed_dir.clone())
            .with_listen(args.network.listen_host.clone(), args.port)
            .apply_network(&args.network);
        config.validate()?;
        Ok(config)
    }

    pub fn from_download_args(args: &DownloadArgs) -> Result<Self> {
        let server = PeerAddress::new(args.server_host.clone(), args.server_port);
        let config = Self::client(server, args.torrent.clone(), args.output_dir.clone())
            .with_listen(args.network.listen_host.clone(), args.port)
            .apply_network(&args.network);
        config.validate()?;
        Ok(config)
    }

    fn apply_network(mut self, network: &NetworkArgs) -> Self {
        if let Some(host) = &network.advertise_host {
            self.advertise_host = host.clone();
        }
        self.extra_bootstrap_nodes = network.bootstrap_nodes.clone();
        self.discovery_interval = Duration::from_secs(network.discovery_interval);
        self
    }

    pub fn is_seeder(&self) -> bool {
        self.role == NodeRole::Seeder
    }

    /// `host:port` for the peer server bind
    pub fn listen_addr(&self) -> String {
        if self.listen_host.contains(':') {
            format!("[{}]:{}", self.listen_host, self.listen_port)
        } else {
            format!("{}:{}", self.listen_host, self.listen_port)
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.torrent_path.as_os_str().is_empty() {
            return Err(TorrentError::config_error_with_field("Metadata path cannot be empty", "torrent_path").into());
        }

        if self.discovery_interval.is_zero() {
            return Err(
                TorrentError::config_error_with_field("Discovery interval must be positive", "discovery_interval").into(),
            );
        }

        if self.listen_host.trim().is_empty() {
            return Err(TorrentError::config_error_with_field("Listen host cannot be empty", "listen_host").into());
        }

        if self.advertise_host.trim().is_empty() {
            return Err(TorrentError::config_error_with_field("Advertise host cannot be empty", "advertise_host").into());
        }

        match self.role {
            NodeRole::Seeder => {
                if self.seed_dir.as_os_str().is_empty() {
                    return Err(TorrentError::config_error_with_field("Seed directory cannot be empty", "seed_dir").into());
                }
            }
            NodeRole::Client => {
                if self.download_dir.as_os_str().is_empty() {
                    return Err(
                        TorrentError::config_error_with_field("Download directory cannot be empty", "download_dir").into(),
                    );
                }
                match &self.bootstrap_server {
                    None => {
                        return Err(TorrentError::config_error_with_field(
                            "A client requires a bootstrap server host and port",
                            "bootstrap_server",
                        )
                        .into())
                    }
                    Some(server) if server.host.is_empty() || server.port == 0 => {
                        return Err(TorrentError::config_error_with_field(
                            format!("Invalid bootstrap server address {}", server),
                            "bootstrap_server",
                        )
                        .into())
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }
}

/// Wildcard binds are not reachable addresses, so announce loopback instead
fn default_advertise_host(listen_host: &str) -> String {
    match listen_host {
        "0.0.0.0" | "" => "127.0.0.1".to_string(),
        "::" => "::1".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{CliArgs, Command};
    use clap::Parser;

    #[test]
    fn test_seeder_defaults() {
        let config = NodeConfig::seeder("seed/demo.torrent", "seed");
        assert!(config.is_seeder());
        assert_eq!(config.listen_port, DEFAULT_SEEDER_PORT);
        assert_eq!(config.listen_addr(), "0.0.0.0:6881");
        assert_eq!(config.advertise_host, "127.0.0.1");
        assert_eq!(config.discovery_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_defaults() {
        let config = NodeConfig::client(PeerAddress::new("127.0.0.1", 5000), "dl/demo.torrent", "dl");
        assert!(!config.is_seeder());
        assert_eq!(config.listen_port, DEFAULT_CLIENT_PORT);
        assert_eq!(config.download_dir, PathBuf::from("dl"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_requires_bootstrap_server() {
        let mut config = NodeConfig::client(PeerAddress::new("127.0.0.1", 5000), "dl/demo.torrent", "dl");
        config.bootstrap_server = None;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::ConfigError { field: Some(field), .. }) if field == "bootstrap_server"
        ));
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let config = NodeConfig::seeder("a.torrent", "seed").with_discovery_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_listen_sets_advertise_host() {
        let config = NodeConfig::seeder("a.torrent", "seed").with_listen("192.168.1.4", 7000);
        assert_eq!(config.advertise_host, "192.168.1.4");
        assert_eq!(config.listen_addr(), "192.168.1.4:7000");

        let config = config.with_listen("::", 7000);
        assert_eq!(config.advertise_host, "::1");
        assert_eq!(config.listen_addr(), "[::]:7000");
    }

    #[test]
    fn test_from_download_args() {
        let args = CliArgs::try_parse_from([
            "dht-file-swarm",
            "download",
            "--server-host",
            "10.0.0.2",
            "--advertise-host",
            "10.0.0.9",
            "--discovery-interval",
            "5",
            "--bootstrap-node",
            "10.0.0.2:6881",
        ])
        .unwrap();
        let Command::Download(download) = args.command else {
            panic!("expected download command");
        };

        let config = NodeConfig::from_download_args(&download).unwrap();
        assert_eq!(config.bootstrap_server, Some(PeerAddress::new("10.0.0.2", 5000)));
        assert_eq!(config.advertise_host, "10.0.0.9");
        assert_eq!(config.discovery_interval, Duration::from_secs(5));
        assert_eq!(config.extra_bootstrap_nodes, vec![BootstrapNode::new("10.0.0.2", 6881)]);
        assert_eq!(config.listen_port, 6882);
    }

    #[test]
    fn test_from_seed_args_rejects_zero_interval() {
        let args = CliArgs::try_parse_from(["dht-file-swarm", "seed", "--discovery-interval", "0"]).unwrap();
        let Command::Seed(seed) = args.command else {
            panic!("expected seed command");
        };
        assert!(NodeConfig::from_seed_args(&seed).is_err());
    }
}

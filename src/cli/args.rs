//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::torrent::BootstrapNode;

/// CLI arguments for the swarm node
#[derive(Debug, Parser)]
#[command(name = "dht-file-swarm", version)]
#[command(about = "Seed and fetch a fixed file set between peers discovered through a DHT", long_about = None)]
pub struct CliArgs {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve a complete file set to the swarm
    Seed(SeedArgs),
    /// Fetch the metadata from a bootstrap server and download every file
    Download(DownloadArgs),
    /// Hand out a .torrent file to bootstrap clients
    ServeMetadata(ServeMetadataArgs),
    /// Fetch a .torrent file from a bootstrap server once
    FetchMetadata(FetchMetadataArgs),
    /// Print the files, bootstrap nodes and content hash of a .torrent file
    Inspect(InspectArgs),
}

/// Options shared by seeders and downloaders
#[derive(Debug, Clone, Args)]
pub struct NetworkArgs {
    /// Address to bind the DHT and peer sockets to
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_host: String,

    /// Host announced to other peers (defaults to 127.0.0.1 for wildcard binds)
    #[arg(long)]
    pub advertise_host: Option<String>,

    /// Extra DHT bootstrap node, host:port (repeatable)
    #[arg(long = "bootstrap-node", value_name = "HOST:PORT", value_parser = parse_bootstrap_node)]
    pub bootstrap_nodes: Vec<BootstrapNode>,

    /// Seconds between discovery cycles
    #[arg(long, default_value_t = 30)]
    pub discovery_interval: u64,
}

#[derive(Debug, Clone, Args)]
pub struct SeedArgs {
    /// Path to the .torrent file
    #[arg(long, default_value = "seeder_files/my_torrent.torrent")]
    pub torrent: PathBuf,

    /// Directory holding every file named in the metadata
    #[arg(long, default_value = "seeder_files")]
    pub seed_dir: PathBuf,

    /// Port for the DHT (UDP) and peer server (TCP)
    #[arg(short, long, default_value_t = 6881)]
    pub port: u16,

    /// Also serve the .torrent file to bootstrap clients on this port
    #[arg(long, value_name = "PORT")]
    pub serve_metadata_port: Option<u16>,

    #[command(flatten)]
    pub network: NetworkArgs,
}

#[derive(Debug, Clone, Args)]
pub struct DownloadArgs {
    /// Bootstrap server host
    #[arg(long, default_value = "127.0.0.1")]
    pub server_host: String,

    /// Bootstrap server port
    #[arg(long, default_value_t = 5000)]
    pub server_port: u16,

    /// Where to save the received .torrent file
    #[arg(long, default_value = "downloads/downloaded.torrent")]
    pub torrent: PathBuf,

    /// Download directory
    #[arg(short, long, default_value = "downloads")]
    pub output_dir: PathBuf,

    /// Port for the DHT (UDP) and peer server (TCP)
    #[arg(short, long, default_value_t = 6882)]
    pub port: u16,

    #[command(flatten)]
    pub network: NetworkArgs,
}

#[derive(Debug, Clone, Args)]
pub struct ServeMetadataArgs {
    /// Path to the .torrent file
    #[arg(value_name = "TORRENT_FILE")]
    pub torrent: PathBuf,

    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,
}

#[derive(Debug, Clone, Args)]
pub struct FetchMetadataArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,

    /// Where to save the received .torrent file
    #[arg(short, long, default_value = "downloads/received_torrent.torrent")]
    pub output: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    /// Path to the .torrent file
    #[arg(value_name = "TORRENT_FILE")]
    pub torrent: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

fn parse_bootstrap_node(value: &str) -> Result<BootstrapNode, String> {
    BootstrapNode::parse(value).ok_or_else(|| format!("expected HOST:PORT, got {:?}", value))
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

//! dht-file-swarm
//!
//! Share a fixed set of files between peers that find each other through a
//! DHT, after fetching the content descriptor from a bootstrap server.

pub mod bootstrap;
pub mod cli;
pub mod dht;
pub mod error;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod torrent;

pub use error::TorrentError;

pub use bootstrap::{BootstrapClient, BootstrapServer};
pub use cli::{CliArgs, Command, NodeConfig, NodeRole};
pub use dht::{Dht, InMemoryDht, KademliaDht, NodeId};
pub use node::{CycleOutcome, Node, TaskRegistry};
pub use peer::{PeerAddress, PeerWireClient, PeerWireServer, SessionReport};
pub use storage::{FileStatus, FileTable};
pub use torrent::{BootstrapNode, TorrentMetadata, TorrentParser};

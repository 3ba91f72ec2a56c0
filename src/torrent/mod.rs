//! Content descriptor module
//!
//! Decodes the bencoded metadata buffer shared by every node in a swarm and
//! derives the content hash used as the discovery key.

pub mod parser;
pub mod info;

pub use parser::TorrentParser;
pub use info::{TorrentMetadata, BootstrapNode};

//! Peer wire module
//!
//! File transfer between nodes: one server per node, one client session per
//! discovered peer.

pub mod address;
pub mod client;
pub mod server;

pub use address::PeerAddress;
pub use client::{PeerWireClient, SessionReport};
pub use server::PeerWireServer;

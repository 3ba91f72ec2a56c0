//! Metadata bootstrap module
//!
//! A small TCP exchange that hands the metadata descriptor to nodes that do
//! not have it yet.

pub mod client;
pub mod server;

pub use client::BootstrapClient;
pub use server::BootstrapServer;

/// Default port of the bootstrap server
pub const DEFAULT_BOOTSTRAP_PORT: u16 = 5000;

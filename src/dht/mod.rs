//! DHT module
//!
//! Peer discovery through a distributed key/value store. The node only talks
//! to the [`Dht`] trait; [`KademliaDht`] runs over UDP and [`InMemoryDht`]
//! keeps everything in one process.

pub mod facade;
pub mod kademlia;
pub mod memory;
pub mod message;
pub mod node;
pub mod routing;

pub use facade::Dht;
pub use kademlia::KademliaDht;
pub use memory::InMemoryDht;
pub use message::{DhtMessage, NodeInfo, QueryType};
pub use node::{Node, NodeId};
pub use routing::{KBucket, RoutingTable};

//! Node module
//!
//! Startup, discovery and download-session ownership for one swarm member.

pub mod orchestrator;
pub mod registry;

pub use orchestrator::{CycleOutcome, Node};
pub use registry::TaskRegistry;

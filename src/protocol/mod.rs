//! Line and frame protocol module
//!
//! Both TCP protocols spoken by a node share the same shape: newline
//! terminated control lines followed by an 8-byte big-endian length and raw
//! payload bytes.

pub mod handshake;
pub mod message;
pub mod wire;

// Re-export main types
pub use handshake::{Hello, HELLO_PREFIX};
pub use message::{BootstrapCommand, WireRequest, GET_FILE_PREFIX, GET_TORRENT, UNKNOWN_COMMAND_REPLY, WELCOME_MESSAGE};
pub use wire::{
    encode_frame_header, read_frame, read_frame_idle, read_line, write_frame, write_line, LENGTH_HEADER_SIZE, MAX_LINE_LENGTH,
};

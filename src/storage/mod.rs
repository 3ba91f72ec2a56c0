//! Storage module
//!
//! Holds the per-file status and content shared by the wire server and the
//! download sessions, and persists completed files to disk.

pub mod file;

pub use file::{persist_file, FileEntry, FileStatus, FileTable};

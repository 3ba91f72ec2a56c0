//! Control line messages
//!
//! Commands exchanged on the bootstrap channel and requests on the peer wire.

use anyhow::Result;
use tracing::trace;

use crate::error::TorrentError;

/// Command a bootstrap client sends to receive the metadata
pub const GET_TORRENT: &str = "GET_TORRENT";

/// Greeting written by the bootstrap server on accept
pub const WELCOME_MESSAGE: &str = "Welcome to the torrent server! Type 'GET_TORRENT' to receive the file.";

/// Reply to any command other than `GET_TORRENT`
pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command. Type 'GET_TORRENT'.";

/// Prefix of a file request on the peer wire
pub const GET_FILE_PREFIX: &str = "GET_FILE:";

/// Command received by the bootstrap server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapCommand {
    GetTorrent,
    Unknown(String),
}

impl BootstrapCommand {
    /// Parse a command line; matching is case-insensitive
    pub fn parse(line: &str) -> Self {
        let command = line.trim().to_uppercase();
        trace!("Parsed bootstrap command: {}", command);
        if command == GET_TORRENT {
            BootstrapCommand::GetTorrent
        } else {
            BootstrapCommand::Unknown(command)
        }
    }
}

/// File request sent after the greeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub name: String,
}

impl WireRequest {
    /// Create a request for a file name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Render the request line without its newline
    pub fn to_line(&self) -> String {
        format!("{}{}", GET_FILE_PREFIX, self.name)
    }

    /// Parse a request line
    pub fn parse(line: &str) -> Result<Self> {
        match line.trim().split_once(':') {
            Some((verb, name)) if verb == GET_FILE_PREFIX.trim_end_matches(':') && !name.is_empty() => {
                Ok(Self::new(name))
            }
            _ => Err(TorrentError::protocol_violation(format!("Expected file request, got {:?}", line)).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_command_parse() {
        assert_eq!(BootstrapCommand::parse("GET_TORRENT"), BootstrapCommand::GetTorrent);
        assert_eq!(BootstrapCommand::parse("  get_torrent \r"), BootstrapCommand::GetTorrent);
        assert_eq!(
            BootstrapCommand::parse("list"),
            BootstrapCommand::Unknown("LIST".to_string())
        );
    }

    #[test]
    fn test_welcome_mentions_command() {
        assert!(WELCOME_MESSAGE.contains(GET_TORRENT));
    }

    #[test]
    fn test_wire_request_line() {
        let request = WireRequest::new("a.txt");
        assert_eq!(request.to_line(), "GET_FILE:a.txt");
        assert_eq!(WireRequest::parse("GET_FILE:a.txt").unwrap(), request);
    }

    #[test]
    fn test_wire_request_keeps_colons_in_name() {
        assert_eq!(WireRequest::parse("GET_FILE:a:b").unwrap().name, "a:b");
    }

    #[test]
    fn test_wire_request_rejects_other_lines() {
        assert!(WireRequest::parse("GET_FILE:").is_err());
        assert!(WireRequest::parse("HELLO:abc").is_err());
        assert!(WireRequest::parse("PUT_FILE:a.txt").is_err());
    }
}

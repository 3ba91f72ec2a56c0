//! Peer greeting
//!
//! Every wire session opens with `HELLO:<content-hash>`.

use anyhow::Result;
use tracing::{debug, warn};

use crate::error::TorrentError;

/// Prefix of the greeting line
pub const HELLO_PREFIX: &str = "HELLO:";

/// Greeting sent by a downloading peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Hex content hash the peer wants to talk about
    pub info_hash: String,
}

impl Hello {
    /// Create a new greeting for a content hash
    pub fn new(info_hash: impl Into<String>) -> Self {
        Self {
            info_hash: info_hash.into(),
        }
    }

    /// Render the greeting line without its newline
    pub fn to_line(&self) -> String {
        format!("{}{}", HELLO_PREFIX, self.info_hash)
    }

    /// Parse a greeting line
    pub fn parse(line: &str) -> Result<Self> {
        let Some(hash) = line.trim().strip_prefix(HELLO_PREFIX) else {
            return Err(TorrentError::protocol_violation(format!("Expected greeting, got {:?}", line)).into());
        };
        let hash = hash.trim();
        if hash.is_empty() {
            return Err(TorrentError::protocol_violation("Greeting carries an empty content hash").into());
        }
        Ok(Self::new(hash))
    }

    /// Check the greeting against the locally served content hash
    pub fn validate(&self, expected_info_hash: &str) -> bool {
        if !self.info_hash.eq_ignore_ascii_case(expected_info_hash) {
            warn!("Greeting validation failed: content hash mismatch");
            warn!("  Expected: {}", expected_info_hash);
            warn!("  Got:      {}", self.info_hash);
            return false;
        }
        debug!("Greeting validation successful");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_line() {
        let hello = Hello::new("abc123");
        assert_eq!(hello.to_line(), "HELLO:abc123");
        assert_eq!(Hello::parse(&hello.to_line()).unwrap(), hello);
    }

    #[test]
    fn test_hello_rejects_other_lines() {
        assert!(Hello::parse("GET_FILE:a.txt").is_err());
        assert!(Hello::parse("HELLO:").is_err());
        assert!(Hello::parse("").is_err());
    }

    #[test]
    fn test_hello_validate() {
        let hello = Hello::new("ABCDEF");
        assert!(hello.validate("abcdef"));
        assert!(!hello.validate("012345"));
    }
}

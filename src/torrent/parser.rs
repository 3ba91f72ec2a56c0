//! Torrent metadata parser
//!
//! Decodes a bencoded descriptor into a [`TorrentMetadata`]. The content hash
//! is the SHA1 of the `info` dictionary re-encoded by `serde_bencode`, which
//! sorts dictionary keys, so every node derives the same key from the same
//! descriptor regardless of the key order in the file it received.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde_bencode::value::Value;
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;
use crate::torrent::info::{BootstrapNode, TorrentMetadata};

/// Parser for bencoded metadata buffers
pub struct TorrentParser;

impl TorrentParser {
    /// Parse metadata from bytes
    pub fn parse_bytes(data: &[u8]) -> Result<TorrentMetadata> {
        debug!("Parsing metadata from {} bytes", data.len());
        trace!("Metadata (first 100 bytes): {:?}", &data[..data.len().min(100)]);

        let root: Value = serde_bencode::from_bytes(data).map_err(|e| {
            error!("Failed to decode metadata: {}", e);
            TorrentError::from(e)
        })?;

        let root_dict = match root {
            Value::Dict(d) => d,
            _ => return Err(TorrentError::parse_error("Root must be a dictionary").into()),
        };

        let info_value = root_dict
            .get(b"info".as_ref())
            .ok_or_else(|| TorrentError::parse_error("Missing info dictionary"))?;
        let info_dict = match info_value {
            Value::Dict(d) => d,
            _ => return Err(TorrentError::parse_error("info must be a dictionary").into()),
        };

        let files = Self::extract_files(info_dict);
        let bootstrap_nodes = Self::extract_nodes(&root_dict);

        let canonical = serde_bencode::to_bytes(info_value).map_err(|e| {
            TorrentError::parse_error_with_source("Failed to re-encode info dictionary", e.to_string())
        })?;
        let info_hash = TorrentMetadata::generate_info_hash(&canonical);

        info!(
            "Decoded metadata: {} files, {} bootstrap nodes, info hash {}",
            files.len(),
            bootstrap_nodes.len(),
            info_hash
        );
        Ok(TorrentMetadata {
            files,
            bootstrap_nodes,
            info_hash,
        })
    }

    /// Parse metadata from a `.torrent` file path
    pub fn parse_file(path: &Path) -> Result<TorrentMetadata> {
        info!("Loading metadata from: {}", path.display());

        if !path.exists() {
            return Err(TorrentError::config_error_with_field(
                format!("Metadata file not found: {}", path.display()),
                "torrent_path",
            )
            .into());
        }
        if !path.is_file() {
            return Err(TorrentError::config_error_with_field(
                format!("Metadata path is not a file: {}", path.display()),
                "torrent_path",
            )
            .into());
        }

        let data = std::fs::read(path).map_err(|e| {
            error!("Failed to read metadata file '{}': {}", path.display(), e);
            TorrentError::config_error_with_field(
                format!("Failed to read metadata file {}: {}", path.display(), e),
                "torrent_path",
            )
        })?;

        debug!("Read {} bytes from metadata file", data.len());
        Self::parse_bytes(&data)
    }

    /// First path component of every `info.files` entry, or `info.name` for a
    /// single-file descriptor
    fn extract_files(info_dict: &HashMap<Vec<u8>, Value>) -> Vec<String> {
        let mut files = Vec::new();

        if let Some(Value::List(entries)) = info_dict.get(b"files".as_ref()) {
            for entry in entries {
                let Value::Dict(file_dict) = entry else {
                    warn!("Skipping non-dictionary file entry");
                    continue;
                };
                let Some(Value::List(path)) = file_dict.get(b"path".as_ref()) else {
                    warn!("Skipping file entry without a path list");
                    continue;
                };
                match path.first() {
                    Some(Value::Bytes(name)) => {
                        if path.len() > 1 {
                            debug!("Flattening {}-segment path to its first segment", path.len());
                        }
                        files.push(String::from_utf8_lossy(name).to_string());
                    }
                    Some(_) => warn!("Skipping file entry with a non-string path segment"),
                    None => trace!("Skipping file entry with an empty path"),
                }
            }
        } else if let Some(Value::Bytes(name)) = info_dict.get(b"name".as_ref()) {
            debug!("Single-file descriptor");
            files.push(String::from_utf8_lossy(name).to_string());
        }

        files
    }

    /// Optional top-level `[host, port]` pairs
    fn extract_nodes(root_dict: &HashMap<Vec<u8>, Value>) -> Vec<BootstrapNode> {
        let Some(Value::List(nodes)) = root_dict.get(b"nodes".as_ref()) else {
            return Vec::new();
        };

        let mut bootstrap_nodes = Vec::new();
        for node in nodes {
            match node {
                Value::List(pair) if pair.len() == 2 => match (&pair[0], &pair[1]) {
                    (Value::Bytes(host), Value::Int(port)) if (1..=65535).contains(port) => {
                        bootstrap_nodes.push(BootstrapNode::new(
                            String::from_utf8_lossy(host).to_string(),
                            *port as u16,
                        ));
                    }
                    _ => warn!("Skipping malformed bootstrap node entry"),
                },
                _ => warn!("Skipping bootstrap node entry that is not a [host, port] pair"),
            }
        }
        bootstrap_nodes
    }
}

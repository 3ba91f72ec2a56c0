//! Bootstrap client
//!
//! Fetches the metadata buffer from a bootstrap server and saves it locally.

use std::path::Path;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::error::TorrentError;
use crate::protocol::{read_frame_idle, read_line, write_line, GET_TORRENT};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// One-shot client for the metadata exchange
pub struct BootstrapClient {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl BootstrapClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect to the server, reporting failure as `false`
    pub async fn connect(&mut self) -> bool {
        match self.try_connect().await {
            Ok(()) => true,
            Err(e) => {
                error!("Could not connect to bootstrap server: {}", e);
                false
            }
        }
    }

    /// Connect to the server
    pub async fn try_connect(&mut self) -> Result<()> {
        let address = self.address();
        info!("Connecting to bootstrap server {}", address);

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|e| {
                warn!("Connection timeout to {}", address);
                TorrentError::connectivity_error_full("Connection timeout", address.clone(), e.to_string())
            })?
            .map_err(|e| {
                TorrentError::connectivity_error_full("Failed to connect", address.clone(), e.to_string())
            })?;

        debug!("Connected to bootstrap server {}", address);
        self.stream = Some(stream);
        Ok(())
    }

    /// Whether a connection is open and unused
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Fetch the metadata and save it, reporting failure as `false`
    pub async fn fetch_metadata(&mut self, save_path: &Path) -> bool {
        match self.download_metadata(save_path).await {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to fetch metadata from {}: {}", self.address(), e);
                false
            }
        }
    }

    /// Fetch the metadata, save it to `save_path` and return the bytes
    pub async fn download_metadata(&mut self, save_path: &Path) -> Result<Vec<u8>> {
        let data = self.request_metadata().await?;

        if let Some(parent) = save_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TorrentError::storage_error_full("Failed to create directory", parent.display().to_string(), e.to_string())
            })?;
        }
        tokio::fs::write(save_path, &data).await.map_err(|e| {
            TorrentError::storage_error_full("Failed to save metadata", save_path.display().to_string(), e.to_string())
        })?;

        info!("Metadata ({} bytes) saved to {}", data.len(), save_path.display());
        Ok(data)
    }

    /// Run the exchange on the open connection and return the raw buffer
    ///
    /// The connection is consumed; a second call needs a new `connect`.
    pub async fn request_metadata(&mut self) -> Result<Vec<u8>> {
        let address = self.address();
        let stream = self.stream.take().ok_or_else(|| {
            TorrentError::connectivity_error_with_address("Not connected to bootstrap server", address.clone())
        })?;

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let welcome = timeout(READ_TIMEOUT, read_line(&mut reader, &address))
            .await
            .map_err(|e| TorrentError::connectivity_error_full("Timed out awaiting welcome", address.clone(), e.to_string()))??
            .ok_or_else(|| TorrentError::protocol_violation_with_peer("Server closed before welcome", address.clone()))?;
        debug!("Server says: {}", welcome);

        if !welcome.contains(GET_TORRENT) {
            return Err(TorrentError::protocol_violation_with_peer(
                format!("Unexpected welcome message: {:?}", welcome),
                address,
            )
            .into());
        }

        write_line(&mut write_half, GET_TORRENT).await?;
        debug!("Sent {} to {}", GET_TORRENT, address);

        let data = read_frame_idle(&mut reader, &address, READ_TIMEOUT).await?;

        info!("Received metadata ({} bytes) from {}", data.len(), address);
        Ok(data)
    }
}

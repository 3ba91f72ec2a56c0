//! Peer wire client
//!
//! One download session: connect to a discovered peer, greet it, and pull
//! every file that was missing when the session started, one after another
//! on the same connection.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::error::TorrentError;
use crate::peer::PeerAddress;
use crate::protocol::{read_frame_idle, write_line, Hello, WireRequest};
use crate::storage::{persist_file, FileTable};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one completed session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Files fetched and marked present by this session
    pub downloaded: Vec<String>,
    /// Files another session completed first
    pub already_present: Vec<String>,
}

/// Downloads missing files from one peer at a time
#[derive(Clone)]
pub struct PeerWireClient {
    files: Arc<FileTable>,
    info_hash: String,
    local: PeerAddress,
    download_dir: PathBuf,
}

impl PeerWireClient {
    pub fn new(files: Arc<FileTable>, info_hash: impl Into<String>, local: PeerAddress, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            files,
            info_hash: info_hash.into(),
            local,
            download_dir: download_dir.into(),
        }
    }

    fn refuse_self(&self, peer: &PeerAddress) -> Result<()> {
        if peer.refers_to(&self.local) {
            warn!("Refusing to download from own address {}", peer);
            return Err(TorrentError::protocol_violation_with_peer("Peer address is this node", peer.to_string()).into());
        }
        Ok(())
    }

    /// Run one session against `peer`
    ///
    /// Any failure aborts the session; files not yet fetched stay missing and
    /// are retried on a later discovery cycle.
    pub async fn download_from(&self, peer: &PeerAddress) -> Result<SessionReport> {
        self.refuse_self(peer)?;

        let address = peer.to_string();
        info!("Connecting to peer {}", address);
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((peer.host.as_str(), peer.port)))
            .await
            .map_err(|e| {
                warn!("Connection timeout to {}", address);
                TorrentError::connectivity_error_full("Connection timeout", address.clone(), e.to_string())
            })?
            .map_err(|e| {
                error!("Failed to connect to {}: {}", address, e);
                TorrentError::connectivity_error_full("Failed to connect", address.clone(), e.to_string())
            })?;

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_line(&mut write_half, &Hello::new(self.info_hash.clone()).to_line()).await?;
        debug!("Sent greeting to {}", address);

        let pending = self.files.missing_files().await;
        info!("Requesting {} missing files from {}", pending.len(), address);

        let mut report = SessionReport::default();
        for name in pending {
            self.refuse_self(peer)?;

            if self.files.status(&name).await.map_or(false, |s| s.is_present()) {
                debug!("File {} completed elsewhere; skipping", name);
                report.already_present.push(name);
                continue;
            }

            write_line(&mut write_half, &WireRequest::new(name.clone()).to_line()).await?;
            debug!("Requested {} from {}", name, address);

            let content = read_frame_idle(&mut reader, &address, READ_TIMEOUT)
                .await
                .map_err(|e| {
                    warn!("Transfer of {} from {} failed: {}", name, address, e);
                    e
                })?;

            let path = persist_file(&self.download_dir, &name, &content).await?;
            if self.files.mark_present(&name, Bytes::from(content)).await? {
                info!("Downloaded {} from {} to {}", name, address, path.display());
                report.downloaded.push(name);
            } else {
                report.already_present.push(name);
            }
        }

        info!(
            "Session with {} finished: {} downloaded, {} already present",
            address,
            report.downloaded.len(),
            report.already_present.len()
        );
        Ok(report)
    }
}

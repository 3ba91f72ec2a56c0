//! Peer wire server
//!
//! Serves files to peers that greet with the matching content hash. A
//! connection ends at the first request for a file that is not present.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;
use crate::protocol::{read_line, write_frame, Hello, WireRequest};
use crate::storage::FileTable;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Grace period for in-flight transfers once shutdown is signalled
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What a connection ended with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeOutcome {
    /// Files sent in full, in request order
    pub served: Vec<String>,
    /// Total payload bytes written
    pub bytes: u64,
    /// Request that ended the connection because the file is not present
    pub unavailable: Option<String>,
}

/// TCP listener for wire sessions
pub struct PeerWireServer {
    listener: TcpListener,
    info_hash: String,
    files: Arc<FileTable>,
}

impl PeerWireServer {
    /// Bind the listener; port 0 picks a free port
    pub async fn bind(addr: &str, info_hash: impl Into<String>, files: Arc<FileTable>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind peer server on {}: {}", addr, e);
            TorrentError::connectivity_error_full("Failed to bind peer server", addr.to_string(), e.to_string())
        })?;
        info!("Peer server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            info_hash: info_hash.into(),
            files,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips to `true` or its sender drops
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut handlers = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        debug!("Accepted peer connection from {}", addr);
                        let info_hash = self.info_hash.clone();
                        let files = self.files.clone();
                        handlers.spawn(async move {
                            match serve_connection(socket, addr, &info_hash, &files).await {
                                Ok(outcome) => {
                                    if let Some(name) = &outcome.unavailable {
                                        warn!("File {} not available for {}", name, addr);
                                    }
                                    debug!(
                                        "Connection from {} closed after {} files ({} bytes)",
                                        addr,
                                        outcome.served.len(),
                                        outcome.bytes
                                    );
                                }
                                Err(e) => warn!("Error handling peer {}: {}", addr, e),
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept peer connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown sender dropped");
                        break;
                    }
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Peer connection handler panicked: {}", e);
                        }
                    }
                }
            }
        }

        info!("Peer server stopping; draining {} connections", handlers.len());
        let drained = timeout(DRAIN_TIMEOUT, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Aborting {} peer connections still in flight", handlers.len());
            handlers.shutdown().await;
        }
        info!("Peer server stopped");
    }
}

/// Run the greeting and request/response exchanges for one connection
///
/// Requests are answered in order until the peer closes or asks for a file
/// that is not present, which closes the connection without a response.
pub async fn serve_connection(
    socket: TcpStream,
    addr: SocketAddr,
    info_hash: &str,
    files: &FileTable,
) -> Result<ServeOutcome> {
    let peer = addr.to_string();
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut outcome = ServeOutcome::default();

    let Some(greeting) = read_with_timeout(&mut reader, &peer).await? else {
        return Ok(outcome);
    };
    let hello = Hello::parse(&greeting).map_err(|e| e.context(format!("greeting from {}", peer)))?;
    if !hello.validate(info_hash) {
        return Err(TorrentError::protocol_violation_with_peer("Greeting names a different content hash", peer).into());
    }
    trace!("Greeting accepted from {}", peer);

    while let Some(line) = read_with_timeout(&mut reader, &peer).await? {
        let request = WireRequest::parse(&line).map_err(|e| e.context(format!("request from {}", peer)))?;
        debug!("Peer {} requested {}", peer, request.name);

        // Clone out of the table so the lock is released before writing
        let Some(content) = files.present_content(&request.name).await else {
            outcome.unavailable = Some(request.name);
            break;
        };

        write_frame(&mut write_half, &content).await?;
        info!("Sent {} ({} bytes) to {}", request.name, content.len(), peer);
        outcome.bytes += content.len() as u64;
        outcome.served.push(request.name);
    }

    Ok(outcome)
}

async fn read_with_timeout(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>, peer: &str) -> Result<Option<String>> {
    timeout(READ_TIMEOUT, read_line(reader, peer))
        .await
        .map_err(|e| TorrentError::connectivity_error_full("Read timeout", peer.to_string(), e.to_string()))?
}

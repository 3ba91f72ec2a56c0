//! Bootstrap server
//!
//! Serves the raw metadata buffer to every client that sends `GET_TORRENT`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;
use crate::protocol::{read_line, write_frame, write_line, BootstrapCommand, UNKNOWN_COMMAND_REPLY, WELCOME_MESSAGE};

/// How often the accept loop re-checks the running flag
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How long a connection may stay silent while awaiting a command
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type ConnectionRegistry = Arc<Mutex<HashMap<SocketAddr, JoinHandle<()>>>>;

/// TCP server handing out one metadata buffer
pub struct BootstrapServer {
    host: String,
    port: u16,
    running: Arc<AtomicBool>,
    connections: ConnectionRegistry,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

impl BootstrapServer {
    /// Create a server that will bind `host:port` when started
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            running: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(Mutex::new(HashMap::new())),
            local_addr: None,
            accept_task: None,
        }
    }

    /// Load the metadata file, bind, and start accepting in the background
    pub async fn start(&mut self, torrent_path: &Path) -> Result<SocketAddr> {
        if self.running.load(Ordering::SeqCst) {
            return Err(TorrentError::config_error("Bootstrap server is already running").into());
        }

        let payload = Bytes::from(load_metadata_file(torrent_path).await?);
        info!(
            "Serving metadata {} ({} bytes)",
            torrent_path.display(),
            payload.len()
        );

        let bind_addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            error!("Failed to bind bootstrap server on {}: {}", bind_addr, e);
            TorrentError::connectivity_error_full("Failed to bind bootstrap server", bind_addr.clone(), e.to_string())
        })?;
        let local_addr = listener.local_addr()?;
        info!("Bootstrap server started on {}", local_addr);

        self.running.store(true, Ordering::SeqCst);
        self.local_addr = Some(local_addr);
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            payload,
            self.running.clone(),
            self.connections.clone(),
        )));

        Ok(local_addr)
    }

    /// Bound address once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether the accept loop is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of connections currently being served
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Stop accepting and close every live connection
    pub async fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping bootstrap server");

        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
        }

        let live: Vec<(SocketAddr, JoinHandle<()>)> = self.connections.lock().await.drain().collect();
        for (addr, handle) in live {
            debug!("Closing bootstrap connection {}", addr);
            handle.abort();
        }
        info!("Bootstrap server stopped");
    }
}

impl Drop for BootstrapServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// Read the metadata file after checking its extension and kind
async fn load_metadata_file(path: &Path) -> Result<Vec<u8>> {
    if path.extension().and_then(|e| e.to_str()) != Some("torrent") {
        return Err(TorrentError::config_error_with_field(
            format!("The file {} is not a torrent file", path.display()),
            "torrent_path",
        )
        .into());
    }
    if !path.is_file() {
        return Err(TorrentError::config_error_with_field(
            format!("The file {} does not exist", path.display()),
            "torrent_path",
        )
        .into());
    }

    tokio::fs::read(path).await.map_err(|e| {
        error!("Error reading file {}: {}", path.display(), e);
        TorrentError::config_error_with_field(
            format!("Failed to read {}: {}", path.display(), e),
            "torrent_path",
        )
        .into()
    })
}

async fn accept_loop(listener: TcpListener, payload: Bytes, running: Arc<AtomicBool>, connections: ConnectionRegistry) {
    while running.load(Ordering::SeqCst) {
        let (socket, addr) = match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Err(_) => continue,
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                error!("Socket error while accepting bootstrap connections: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };
        info!("Accepted bootstrap connection from {}", addr);

        // Insert under the lock so the task cannot deregister before it is registered
        let mut registry = connections.lock().await;
        let handle = tokio::spawn({
            let payload = payload.clone();
            let connections = connections.clone();
            async move {
                match handle_client(socket, addr, payload).await {
                    Ok(()) => debug!("Bootstrap exchange with {} finished", addr),
                    Err(e) => warn!("Error handling bootstrap client {}: {}", addr, e),
                }
                let mut registry = connections.lock().await;
                registry.remove(&addr);
                debug!("Closing bootstrap connection {} ({} active)", addr, registry.len());
            }
        });
        registry.insert(addr, handle);
        debug!("Total active bootstrap clients: {}", registry.len());
    }
    debug!("Bootstrap accept loop exited");
}

async fn handle_client(socket: TcpStream, addr: SocketAddr, payload: Bytes) -> Result<()> {
    let peer = addr.to_string();
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    write_line(&mut write_half, WELCOME_MESSAGE).await?;

    loop {
        let line = timeout(COMMAND_TIMEOUT, read_line(&mut reader, &peer))
            .await
            .map_err(|e| TorrentError::connectivity_error_full("Timed out awaiting command", peer.clone(), e.to_string()))??;

        let Some(line) = line else {
            debug!("Client {} disconnected before requesting metadata", addr);
            return Ok(());
        };

        match BootstrapCommand::parse(&line) {
            BootstrapCommand::GetTorrent => {
                info!("Client {} requested the metadata", addr);
                write_frame(&mut write_half, &payload).await?;
                info!("Sent metadata ({} bytes) to {}", payload.len(), addr);
                return Ok(());
            }
            BootstrapCommand::Unknown(command) => {
                trace!("Unknown command {:?} from {}", command, addr);
                write_line(&mut write_half, UNKNOWN_COMMAND_REPLY).await?;
            }
        }
    }
}

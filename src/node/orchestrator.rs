//! Download orchestrator
//!
//! A node owns the metadata, the file table and a DHT handle. Seeders and
//! complete nodes announce themselves under the content key; everyone else
//! looks the key up and downloads from whoever answered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::bootstrap::BootstrapClient;
use crate::cli::config::NodeConfig;
use crate::dht::Dht;
use crate::error::TorrentError;
use crate::node::registry::TaskRegistry;
use crate::peer::{PeerAddress, PeerWireClient, PeerWireServer};
use crate::storage::FileTable;
use crate::torrent::{TorrentMetadata, TorrentParser};

/// What one discovery cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Our address was stored under the content key
    Announced,
    /// The store failed; retried next cycle
    AnnounceFailed,
    /// Nothing usable under the content key
    NoPeer,
    /// A download session was started against this peer
    SessionSpawned(PeerAddress),
}

pub struct Node {
    config: NodeConfig,
    metadata: Arc<TorrentMetadata>,
    files: Arc<FileTable>,
    dht: Arc<dyn Dht>,
    sessions: Arc<TaskRegistry>,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
}

impl Node {
    /// Load (seeder) or fetch (client) the metadata and build the file table
    pub async fn connect_and_get_torrent(config: NodeConfig, dht: Arc<dyn Dht>) -> Result<Self> {
        config.validate()?;

        let (metadata, files) = if config.is_seeder() {
            Self::load_seeder(&config).await?
        } else {
            Self::fetch_client(&config).await?
        };

        let (present, missing) = files.counts().await;
        info!(
            "Node ready for content {}: {} files present, {} missing",
            metadata.content_hash(),
            present,
            missing
        );

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            metadata: Arc::new(metadata),
            files: Arc::new(files),
            dht,
            sessions: Arc::new(TaskRegistry::new()),
            shutdown_tx,
            started: AtomicBool::new(false),
        })
    }

    async fn load_seeder(config: &NodeConfig) -> Result<(TorrentMetadata, FileTable)> {
        let metadata = TorrentParser::parse_file(&config.torrent_path).map_err(|e| {
            error!("Seeder cannot load metadata {}: {}", config.torrent_path.display(), e);
            e
        })?;
        let files = FileTable::load_seed(&metadata.files, &config.seed_dir).await?;
        Ok((metadata, files))
    }

    async fn fetch_client(config: &NodeConfig) -> Result<(TorrentMetadata, FileTable)> {
        let server = config.bootstrap_server.as_ref().ok_or_else(|| {
            TorrentError::config_error_with_field("A client requires a bootstrap server", "bootstrap_server")
        })?;

        let mut client = BootstrapClient::new(server.host.clone(), server.port);
        client.try_connect().await?;
        let data = client.download_metadata(&config.torrent_path).await?;
        let metadata = TorrentParser::parse_bytes(&data)?;

        tokio::fs::create_dir_all(&config.download_dir).await.map_err(|e| {
            TorrentError::storage_error_full(
                "Failed to create download directory",
                config.download_dir.display().to_string(),
                e.to_string(),
            )
        })?;

        let files = FileTable::new_missing(&metadata.files);
        Ok((metadata, files))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metadata(&self) -> &TorrentMetadata {
        &self.metadata
    }

    pub fn files(&self) -> Arc<FileTable> {
        self.files.clone()
    }

    pub fn sessions(&self) -> &TaskRegistry {
        &self.sessions
    }

    pub fn is_seeder(&self) -> bool {
        self.config.is_seeder()
    }

    /// Join the DHT, serve files and run discovery until `shutdown`
    pub async fn run(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TorrentError::config_error("Node is already running").into());
        }

        self.dht
            .listen(self.config.listen_port, &self.config.listen_host)
            .await
            .map_err(|e| {
                error!("DHT failed to listen on {}: {}", self.config.listen_addr(), e);
                e
            })?;

        let mut seeds = self.metadata.bootstrap_nodes.clone();
        seeds.extend(self.config.extra_bootstrap_nodes.iter().cloned());
        if seeds.is_empty() {
            info!("No DHT bootstrap nodes known; waiting for others to contact us");
        } else {
            match self.dht.bootstrap(&seeds).await {
                Ok(reached) => info!("DHT bootstrap reached {} of {} nodes", reached, seeds.len()),
                Err(e) => warn!("DHT bootstrap failed: {}", e),
            }
        }

        let server = match PeerWireServer::bind(
            &self.config.listen_addr(),
            self.metadata.info_hash.clone(),
            self.files.clone(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                self.dht.stop().await;
                return Err(e);
            }
        };
        let local = PeerAddress::new(self.config.advertise_host.clone(), server.local_addr()?.port());
        info!(
            "{} node serving content {} as {}",
            if self.is_seeder() { "Seeder" } else { "Client" },
            self.metadata.content_hash(),
            local
        );

        tokio::join!(
            server.run(self.shutdown_tx.subscribe()),
            self.discovery_loop(local, self.shutdown_tx.subscribe())
        );

        self.sessions.shutdown().await;
        self.dht.stop().await;
        info!("Node stopped");
        Ok(())
    }

    /// Stop discovery, cancel download sessions and stop serving
    pub async fn shutdown(&self) {
        info!("Shutting down node");
        self.shutdown_tx.send_replace(true);
        self.sessions.shutdown().await;
    }

    async fn discovery_loop(&self, local: PeerAddress, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.discovery_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.discovery_cycle(&local).await;
                    debug!("Discovery cycle finished: {:?}", outcome);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Discovery loop stopped");
    }

    /// Announce if we hold everything, otherwise look for a peer that does
    pub async fn discovery_cycle(&self, local: &PeerAddress) -> CycleOutcome {
        let key = self.metadata.dht_key();

        if self.is_seeder() || self.files.all_present().await {
            return match self.dht.set(&key, &local.to_dht_value()).await {
                Ok(()) => {
                    info!("Announced {} for content {}", local, self.metadata.content_hash());
                    CycleOutcome::Announced
                }
                Err(e) => {
                    warn!("Failed to announce {}: {}", local, e);
                    CycleOutcome::AnnounceFailed
                }
            };
        }

        let value = match self.dht.get(&key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                info!("No peers found for content {} yet", self.metadata.content_hash());
                return CycleOutcome::NoPeer;
            }
            Err(e) => {
                warn!("DHT lookup failed: {}", e);
                return CycleOutcome::NoPeer;
            }
        };

        let peer = match PeerAddress::from_dht_value(&value) {
            Ok(peer) => peer,
            Err(e) => {
                warn!("Ignoring malformed peer value {:?}: {}", String::from_utf8_lossy(&value), e);
                return CycleOutcome::NoPeer;
            }
        };

        if peer.refers_to(local) {
            debug!("Lookup returned our own address {}", peer);
            return CycleOutcome::NoPeer;
        }

        let (present, missing) = self.files.counts().await;
        info!("Found peer {} ({} of {} files present locally)", peer, present, present + missing);

        let client = PeerWireClient::new(
            self.files.clone(),
            self.metadata.info_hash.clone(),
            local.clone(),
            self.config.download_dir.clone(),
        );
        let target = peer.clone();
        let spawned = self
            .sessions
            .spawn(async move {
                match client.download_from(&target).await {
                    Ok(report) => info!(
                        "Session with {} finished: {} downloaded, {} already present",
                        target,
                        report.downloaded.len(),
                        report.already_present.len()
                    ),
                    Err(e) => warn!("Session with {} failed: {}", target, e),
                }
            })
            .await;

        if spawned {
            CycleOutcome::SessionSpawned(peer)
        } else {
            CycleOutcome::NoPeer
        }
    }
}

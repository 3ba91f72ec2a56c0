//! dht-file-swarm - Main entry point

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dht_file_swarm::cli::args::{DownloadArgs, FetchMetadataArgs, InspectArgs, SeedArgs, ServeMetadataArgs};
use dht_file_swarm::error::classify;
use dht_file_swarm::{
    BootstrapClient, BootstrapServer, CliArgs, Command, KademliaDht, Node, NodeConfig, TorrentParser,
};
use tracing::{debug, error, info, warn};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at an unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let result = match &args.command {
        Command::Seed(seed) => run_seed(seed).await,
        Command::Download(download) => run_download(download).await,
        Command::ServeMetadata(serve) => run_serve_metadata(serve).await,
        Command::FetchMetadata(fetch) => run_fetch_metadata(fetch).await,
        Command::Inspect(inspect) => run_inspect(inspect),
    };

    if let Err(e) = &result {
        match classify(e) {
            Some(err) if err.is_fatal() => error!("Fatal: {:#}", e),
            _ => error!("{:#}", e),
        }
    }
    result
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level {:?}", level);
}

async fn run_seed(args: &SeedArgs) -> Result<()> {
    let config = NodeConfig::from_seed_args(args).context("Invalid seeder configuration")?;

    let mut metadata_server = None;
    if let Some(port) = args.serve_metadata_port {
        let mut server = BootstrapServer::new(config.listen_host.clone(), port);
        server
            .start(&config.torrent_path)
            .await
            .context("Failed to start metadata server")?;
        metadata_server = Some(server);
    }

    let node = Node::connect_and_get_torrent(config, Arc::new(KademliaDht::new()))
        .await
        .context("Seeder setup failed")?;
    let result = run_node(&node).await;

    if let Some(mut server) = metadata_server {
        server.shutdown().await;
    }
    result
}

async fn run_download(args: &DownloadArgs) -> Result<()> {
    let config = NodeConfig::from_download_args(args).context("Invalid client configuration")?;
    let node = Node::connect_and_get_torrent(config, Arc::new(KademliaDht::new()))
        .await
        .context("Client setup failed")?;
    run_node(&node).await
}

/// Run until the node stops on its own or Ctrl-C arrives
async fn run_node(node: &Node) -> Result<()> {
    let run = node.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Interrupted; shutting down");
            node.shutdown().await;
        }
    }

    run.await
}

async fn run_serve_metadata(args: &ServeMetadataArgs) -> Result<()> {
    let mut server = BootstrapServer::new(args.host.clone(), args.port);
    let addr = server
        .start(&args.torrent)
        .await
        .context("Failed to start metadata server")?;
    info!("Serving {} on {}", args.torrent.display(), addr);

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }
    info!("Interrupted; shutting down");
    server.shutdown().await;
    Ok(())
}

async fn run_fetch_metadata(args: &FetchMetadataArgs) -> Result<()> {
    let mut client = BootstrapClient::new(args.host.clone(), args.port);
    client.try_connect().await.context("Failed to reach bootstrap server")?;
    let data = client
        .download_metadata(&args.output)
        .await
        .context("Failed to fetch metadata")?;
    println!("Saved {} bytes to {}", data.len(), args.output.display());
    Ok(())
}

fn run_inspect(args: &InspectArgs) -> Result<()> {
    let metadata = load_metadata(&args.torrent)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("Files ({}):", metadata.file_count());
    for name in &metadata.files {
        println!("  {}", name);
    }
    println!("Bootstrap nodes ({}):", metadata.bootstrap_nodes.len());
    for node in &metadata.bootstrap_nodes {
        println!("  {}", node);
    }
    println!("Info hash: {}", metadata.content_hash());
    Ok(())
}

fn load_metadata(path: &Path) -> Result<dht_file_swarm::TorrentMetadata> {
    TorrentParser::parse_file(path).with_context(|| format!("Failed to load metadata from {}", path.display()))
}

//! End-to-end swarm scenarios over loopback sockets

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dht_file_swarm::{
    BootstrapNode, BootstrapServer, Dht, InMemoryDht, KademliaDht, Node, NodeConfig, PeerAddress, TorrentParser,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;

const TWO_FILES: &[u8] =
    b"d4:infod5:filesld6:lengthi10e4:pathl5:a.txteed6:lengthi20e4:pathl5:b.txteee4:name4:demoee";
const A_TXT: &[u8] = b"0123456789";
const B_TXT: &[u8] = b"abcdefghijklmnopqrst";
const INTERVAL: Duration = Duration::from_millis(100);

fn write_seed(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("demo.torrent"), TWO_FILES).unwrap();
    std::fs::write(dir.join("a.txt"), A_TXT).unwrap();
    std::fs::write(dir.join("b.txt"), B_TXT).unwrap();
}

fn spawn_run(node: &Arc<Node>) -> JoinHandle<anyhow::Result<()>> {
    let node = node.clone();
    tokio::spawn(async move { node.run().await })
}

async fn wait_complete(node: &Node, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if node.files().all_present().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn start_seeder(seed_dir: &Path, dht: Arc<dyn Dht>) -> Arc<Node> {
    let config = NodeConfig::seeder(seed_dir.join("demo.torrent"), seed_dir)
        .with_listen("127.0.0.1", 0)
        .with_discovery_interval(INTERVAL);
    Arc::new(Node::connect_and_get_torrent(config, dht).await.unwrap())
}

async fn start_client(
    download_dir: &Path,
    server_port: u16,
    dht: Arc<dyn Dht>,
    bootstrap_nodes: Vec<BootstrapNode>,
) -> Arc<Node> {
    let config = NodeConfig::client(
        PeerAddress::new("127.0.0.1", server_port),
        download_dir.join("downloaded.torrent"),
        download_dir,
    )
    .with_listen("127.0.0.1", 0)
    .with_bootstrap_nodes(bootstrap_nodes)
    .with_discovery_interval(INTERVAL);
    Arc::new(Node::connect_and_get_torrent(config, dht).await.unwrap())
}

async fn stop(node: &Node, runner: JoinHandle<anyhow::Result<()>>) {
    node.shutdown().await;
    tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

fn assert_downloaded(dir: &Path) {
    assert_eq!(std::fs::read(dir.join("a.txt")).unwrap(), A_TXT);
    assert_eq!(std::fs::read(dir.join("b.txt")).unwrap(), B_TXT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_files_through_shared_dht() {
    let dir = TempDir::new().unwrap();
    let seed_dir = dir.path().join("seeder_files");
    let download_dir = dir.path().join("downloads");
    write_seed(&seed_dir);

    let mut metadata_server = BootstrapServer::new("127.0.0.1", 0);
    let server_addr = metadata_server.start(&seed_dir.join("demo.torrent")).await.unwrap();

    let network = InMemoryDht::new();
    let seeder = start_seeder(&seed_dir, Arc::new(network.join())).await;
    let client = start_client(&download_dir, server_addr.port(), Arc::new(network.join()), Vec::new()).await;

    assert_eq!(client.files().counts().await, (0, 2));
    assert_eq!(
        client.metadata().content_hash(),
        seeder.metadata().content_hash()
    );

    let seeder_run = spawn_run(&seeder);
    let client_run = spawn_run(&client);

    assert!(wait_complete(&client, Duration::from_secs(15)).await);
    assert_downloaded(&download_dir);
    assert_eq!(client.files().present_content("b.txt").await.unwrap().as_ref(), B_TXT);

    // The fetched descriptor decodes to the same content
    let saved = TorrentParser::parse_file(&download_dir.join("downloaded.torrent")).unwrap();
    assert_eq!(saved.info_hash, seeder.metadata().info_hash);

    stop(&client, client_run).await;
    stop(&seeder, seeder_run).await;
    metadata_server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_complete_client_announces_itself() {
    let dir = TempDir::new().unwrap();
    let seed_dir = dir.path().join("seeder_files");
    let download_dir = dir.path().join("downloads");
    write_seed(&seed_dir);

    let mut metadata_server = BootstrapServer::new("127.0.0.1", 0);
    let server_addr = metadata_server.start(&seed_dir.join("demo.torrent")).await.unwrap();

    let network = InMemoryDht::new();
    let seeder = start_seeder(&seed_dir, Arc::new(network.join())).await;
    let client = start_client(&download_dir, server_addr.port(), Arc::new(network.join()), Vec::new()).await;

    let seeder_run = spawn_run(&seeder);
    let client_run = spawn_run(&client);
    assert!(wait_complete(&client, Duration::from_secs(15)).await);

    // With the seeder gone, the complete client takes over the content key
    stop(&seeder, seeder_run).await;
    let key = client.metadata().dht_key();
    network.set(&key, b"stale:1").await.unwrap();

    let mut announced = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let value = network.get(&key).await.unwrap().unwrap();
        if value != b"stale:1" {
            announced = Some(value);
            break;
        }
    }
    let announced = PeerAddress::from_dht_value(&announced.unwrap()).unwrap();
    assert_eq!(announced.host, "127.0.0.1");
    assert_ne!(announced.port, 0);

    stop(&client, client_run).await;
    metadata_server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_files_through_kademlia() {
    let dir = TempDir::new().unwrap();
    let seed_dir = dir.path().join("seeder_files");
    let download_dir = dir.path().join("downloads");
    write_seed(&seed_dir);

    let mut metadata_server = BootstrapServer::new("127.0.0.1", 0);
    let server_addr = metadata_server.start(&seed_dir.join("demo.torrent")).await.unwrap();

    let seeder_dht = Arc::new(KademliaDht::new());
    let seeder = start_seeder(&seed_dir, seeder_dht.clone()).await;
    let seeder_run = spawn_run(&seeder);

    let mut seeder_dht_addr = None;
    for _ in 0..100 {
        seeder_dht_addr = seeder_dht.local_addr();
        if seeder_dht_addr.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let seed = BootstrapNode::new("127.0.0.1", seeder_dht_addr.unwrap().port());

    let client = start_client(
        &download_dir,
        server_addr.port(),
        Arc::new(KademliaDht::new()),
        vec![seed],
    )
    .await;
    let client_run = spawn_run(&client);

    assert!(wait_complete(&client, Duration::from_secs(20)).await);
    assert_downloaded(&download_dir);

    stop(&client, client_run).await;
    stop(&seeder, seeder_run).await;
    metadata_server.shutdown().await;
}

#[tokio::test]
async fn test_client_without_peers_stays_missing() {
    let dir = TempDir::new().unwrap();
    let seed_dir = dir.path().join("seeder_files");
    let download_dir = dir.path().join("downloads");
    write_seed(&seed_dir);

    let mut metadata_server = BootstrapServer::new("127.0.0.1", 0);
    let server_addr = metadata_server.start(&seed_dir.join("demo.torrent")).await.unwrap();

    let client = start_client(&download_dir, server_addr.port(), Arc::new(InMemoryDht::new()), Vec::new()).await;
    let client_run = spawn_run(&client);

    assert!(!wait_complete(&client, Duration::from_millis(400)).await);
    assert_eq!(client.files().counts().await, (0, 2));
    assert!(!download_dir.join("a.txt").exists());

    stop(&client, client_run).await;
    metadata_server.shutdown().await;
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ekehi_node::network::api;
use ekehi_node::store::SledStore;
use ekehi_node::{Node, NodeConfig};
use tracing_subscriber::EnvFilter;

/// A permissionless proof-of-work node: chain, mempool, miner, gossip, sync.
#[derive(Parser, Debug)]
#[command(name = "ekehi-node", version, about)]
struct Cli {
    /// Port to listen on. Overrides the configured network.listenPort.
    port: Option<u16>,

    /// This node's own publicly reachable URL, announced to peers.
    /// Overrides network.publicUrl and any EKEHI_NODE__NETWORK__PUBLIC_URL
    /// environment value.
    public_node_url: Option<String>,

    /// Optional config file (TOML/JSON/YAML, sniffed by extension).
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Opens the durable store, retrying with linear backoff on transient
/// failures (e.g. a lock briefly held by a still-exiting previous
/// process). Exhausting `attempts` exits the node with an error rather
/// than falling back to a read-only mode — a node operator should see
/// startup fail loudly rather than silently run without persistence.
async fn open_store_with_retry(data_dir: &PathBuf, attempts: u32) -> anyhow::Result<SledStore> {
    let mut last_err = None;
    for attempt in 1..=attempts {
        match SledStore::open(data_dir) {
            Ok(store) => return Ok(store),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "failed to open durable store, retrying");
                last_err = Some(err);
                tokio::time::sleep(std::time::Duration::from_millis(200 * attempt as u64)).await;
            }
        }
    }
    Err(last_err.expect("loop runs at least once").into())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = NodeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Some(port) = cli.port {
        config = config.with_listen_port(port);
    }
    if let Some(url) = cli.public_node_url {
        config = config.with_public_url(url);
    }

    let data_dir = config.store.data_dir.clone();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let store = Arc::new(open_store_with_retry(&data_dir, 3).await?);

    let listen_port = config.network.listen_port;
    let node = Arc::new(Node::new(config, store).context("failed to initialize node")?);
    node.start();

    let app = api::router(node.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let started_at = chrono::Local::now().to_rfc3339();
    tracing::info!(%addr, started_at = %started_at, "ekehi-node listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "http server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    node.stop();
    Ok(())
}

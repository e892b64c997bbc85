//! The node facade: owns every component and the lifecycle of the
//! background workers (miner, peer discovery, health checks, sync,
//! metrics) that drive them.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::amount::Amount;
use crate::blockchain::block::Block;
use crate::blockchain::chain::{AddressData, Chain, ChainReader};
use crate::blockchain::transaction::{Transaction, TransactionId};
use crate::blockchain::Mempool;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::miner::{run_mining_loop, Miner};
use crate::network::{Gossiper, PeerSet, SyncManager, SyncScheduler};
use crate::store::{save_best_effort, Store, SECTION_CHAIN, SECTION_CONFIG, SECTION_MEMPOOL, SECTION_PEERS};

/// `/stats` response shape: `totalBlocks`, `networkNodes`, and
/// `difficulty` are the fields `spec.md` §6 names as the minimum; the
/// rest are the node's own operational metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_blocks: usize,
    pub network_nodes: usize,
    pub difficulty: u32,
    pub total_supply: Amount,
    pub uptime_seconds: u64,
    pub mempool_depth: usize,
    pub average_block_interval_ms: Option<u64>,
    pub mining_enabled: bool,
}

pub struct Node {
    pub config: Arc<NodeConfig>,
    pub chain: Arc<Chain>,
    pub mempool: Arc<Mempool>,
    pub peers: Arc<PeerSet>,
    pub store: Arc<dyn Store>,
    pub miner: Arc<Miner>,
    pub gossiper: Arc<Gossiper>,
    pub sync: Arc<SyncManager>,
    started_at: Instant,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Builds a node from persisted state when available, falling back to
    /// a fresh genesis chain and an empty peer set otherwise.
    pub fn new(config: NodeConfig, store: Arc<dyn Store>) -> Result<Self, NodeError> {
        let config = Arc::new(config);

        let chain = match store.load(SECTION_CHAIN)? {
            Some(value) => {
                let blocks: Vec<Block> = serde_json::from_value(value["blocks"].clone())
                    .map_err(|e| NodeError::StoreUnavailable(format!("corrupt chain record: {e}")))?;
                Chain::from_blocks(blocks)?
            }
            None => Chain::new(Block::genesis(config.mining.difficulty)),
        };
        let chain = Arc::new(chain);

        let peers = Arc::new(PeerSet::new(config.network.public_url.clone(), config.network.max_peers));
        if let Some(value) = store.load(SECTION_PEERS)? {
            if let Ok(urls) = serde_json::from_value::<Vec<String>>(value) {
                for url in urls {
                    peers.add(url);
                }
            }
        }
        for seed in &config.network.seeds {
            peers.add(seed.clone());
        }

        let mempool = Arc::new(Mempool::new());
        if let Some(value) = store.load(SECTION_MEMPOOL)? {
            if let Ok(transactions) = serde_json::from_value::<Vec<Transaction>>(value) {
                mempool.restore(transactions);
            }
        }
        save_best_effort(
            store.as_ref(),
            SECTION_CONFIG,
            &serde_json::to_value(config.as_ref()).expect("config always serializes"),
        );

        let miner = Arc::new(Miner::new());
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| NodeError::PeerUnreachable(format!("failed to build http client: {e}")))?;
        let gossiper = Arc::new(Gossiper::new(
            client.clone(),
            config.network.gossip_fanout_concurrency,
            config.peer_request_timeout(),
        ));
        let sync = Arc::new(SyncManager::new(
            chain.clone(),
            mempool.clone(),
            peers.clone(),
            store.clone(),
            client,
        ));

        Ok(Node {
            config,
            chain,
            mempool,
            peers,
            store,
            miner,
            gossiper,
            sync,
            started_at: Instant::now(),
            handles: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Spawns the miner, discovery, health-check, sync, and metrics-log
    /// workers. Idempotent only in the sense that calling it twice spawns
    /// a second set of workers — callers call it exactly once at startup.
    pub fn start(self: &Arc<Self>) {
        let mut handles = Vec::new();

        handles.push(tokio::spawn(run_mining_loop(
            self.miner.clone(),
            self.chain.clone(),
            self.mempool.clone(),
            self.peers.clone(),
            self.gossiper.clone(),
            self.store.clone(),
            self.config.clone(),
        )));

        handles.push({
            let node = self.clone();
            tokio::spawn(async move { node.run_discovery_loop().await })
        });

        handles.push({
            let node = self.clone();
            tokio::spawn(async move { node.run_health_loop().await })
        });

        handles.push({
            let scheduler = SyncScheduler::new(self.sync.clone());
            let config = self.config.clone();
            tokio::spawn(async move { scheduler.run(config).await })
        });

        handles.push({
            let node = self.clone();
            tokio::spawn(async move { node.run_metrics_loop().await })
        });

        *self.handles.lock() = handles;
    }

    /// Logs a metrics snapshot periodically so operators have a running
    /// record of node health without having to poll `/stats`.
    async fn run_metrics_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let metrics = self.metrics();
            tracing::info!(
                blocks = metrics.total_blocks,
                mempool = metrics.mempool_depth,
                peers = metrics.network_nodes,
                mining = metrics.mining_enabled,
                "node metrics"
            );
        }
    }

    async fn run_discovery_loop(self: Arc<Self>) {
        let client = reqwest::Client::new();
        let mut interval_ms = self.config.network.discovery_base_interval_ms;
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(interval_ms)).await;
            let before = self.peers.len();
            self.peers.discover(&client, self.config.as_ref()).await;
            save_best_effort(
                self.store.as_ref(),
                SECTION_PEERS,
                &serde_json::json!(self.peers.urls()),
            );
            // Phase 4 of discovery: invoke the sync manager once now that
            // the peer set may have grown. A cooldown/in-progress skip
            // here is expected and not logged as a failure.
            let _ = self
                .sync
                .run_once(
                    self.config.peer_request_timeout(),
                    self.config.sync_cooldown(),
                    self.config.network.gossip_fanout_concurrency,
                )
                .await;
            if self.peers.len() > before {
                interval_ms = self.config.network.discovery_base_interval_ms;
            } else {
                interval_ms = (interval_ms * 3 / 2).min(self.config.network.discovery_max_interval_ms);
            }
        }
    }

    async fn run_health_loop(self: Arc<Self>) {
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(self.config.health_interval());
        loop {
            ticker.tick().await;
            self.peers
                .health_check_all(&client, self.config.peer_request_timeout())
                .await;
            self.peers.prune_unhealthy(self.config.network.unhealthy_eviction_threshold);
            self.peers.prune_loopback();
            save_best_effort(
                self.store.as_ref(),
                SECTION_PEERS,
                &serde_json::json!(self.peers.urls()),
            );
        }
    }

    /// Aborts background workers in reverse spawn order and flushes the
    /// store, so shutdown leaves durable state consistent with what was
    /// last persisted best-effort.
    pub fn stop(&self) {
        let mut handles = self.handles.lock();
        while let Some(handle) = handles.pop() {
            handle.abort();
        }
        if let Err(err) = self.store.flush() {
            tracing::warn!(error = %err, "store flush failed during shutdown");
        }
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            total_blocks: self.chain.len(),
            network_nodes: self.peers.len(),
            difficulty: self.chain.tip().difficulty,
            total_supply: self.chain.total_supply(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            mempool_depth: self.mempool.len(),
            average_block_interval_ms: self.miner.average_block_interval_ms(),
            mining_enabled: self.miner.is_enabled(),
        }
    }

    pub fn submit_transaction(&self, tx: Transaction) -> Result<TransactionId, NodeError> {
        let id = self.mempool.admit(tx.clone(), self.chain.as_ref(), self.config.mining.min_fee)?;
        self.persist_mempool();
        Ok(id)
    }

    pub fn receive_block(&self, block: Block) -> Result<(), NodeError> {
        self.chain.receive_new_block(block, self.config.mining.min_fee)?;
        save_best_effort(
            self.store.as_ref(),
            SECTION_CHAIN,
            &serde_json::json!({ "blocks": self.chain.snapshot() }),
        );
        self.mempool.reconcile_after_replace(self.chain.as_ref());
        self.persist_mempool();
        Ok(())
    }

    fn persist_mempool(&self) {
        save_best_effort(
            self.store.as_ref(),
            SECTION_MEMPOOL,
            &serde_json::json!(self.mempool.snapshot()),
        );
    }

    pub fn balance_of(&self, address: &str) -> Amount {
        self.chain.balance_of(address)
    }

    pub fn address_data(&self, address: &str) -> AddressData {
        self.chain.address_data(address)
    }

    pub fn revision(&self) -> u64 {
        self.chain.revision()
    }
}

//! Whole-chain synchronization: fetch every peer's chain, pick the winner
//! by fork-choice rank, and atomically replace ours if it wins.
//!
//! Split into a `SyncManager` holding the actual procedure and state,
//! driven by a `SyncScheduler` that owns the ticker and the cooldown
//! gate. A single "fetch whole chain, compare, replace" round is enough
//! since these chains are small; no incremental headers-first download.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};

use crate::amount::Amount;
use crate::blockchain::chain::{candidate_wins, Chain};
use crate::blockchain::{Block, ChainReader, Mempool};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::network::peer::PeerSet;
use crate::store::{save_best_effort, Store, SECTION_CHAIN};

#[derive(Debug, serde::Deserialize)]
struct ChainResponse {
    #[serde(rename = "chain")]
    blocks: Vec<Block>,
    #[serde(rename = "pendingTransactions", default)]
    pending_transactions: Vec<crate::blockchain::Transaction>,
}

pub struct SyncManager {
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    peers: Arc<PeerSet>,
    store: Arc<dyn Store>,
    client: reqwest::Client,
    in_progress: AtomicBool,
    last_run: parking_lot::Mutex<Option<Instant>>,
}

impl SyncManager {
    pub fn new(
        chain: Arc<Chain>,
        mempool: Arc<Mempool>,
        peers: Arc<PeerSet>,
        store: Arc<dyn Store>,
        client: reqwest::Client,
    ) -> Self {
        SyncManager {
            chain,
            mempool,
            peers,
            store,
            client,
            in_progress: AtomicBool::new(false),
            last_run: parking_lot::Mutex::new(None),
        }
    }

    /// Runs one sync round unless one is already in flight or the cooldown
    /// hasn't elapsed since the last round. Returns the
    /// reason for a skip, or `Ok(true)` if the chain was replaced.
    pub async fn run_once(
        &self,
        timeout: Duration,
        cooldown: Duration,
        fanout: usize,
    ) -> Result<bool, NodeError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NodeError::SyncSkipped("sync already in progress".into()));
        }
        // Don't hold the cooldown lock across the await below: it's only
        // ever checked-then-stamped here, never held during network I/O.
        {
            let mut last_run = self.last_run.lock();
            if let Some(at) = *last_run {
                if at.elapsed() < cooldown {
                    self.in_progress.store(false, Ordering::SeqCst);
                    return Err(NodeError::SyncSkipped("cooldown has not elapsed".into()));
                }
            }
            *last_run = Some(Instant::now());
        }

        let result = self.sync_round(timeout, fanout).await;
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn sync_round(&self, timeout: Duration, fanout: usize) -> Result<bool, NodeError> {
        let urls = self.peers.urls();
        if urls.is_empty() {
            return Ok(false);
        }

        let candidates: Vec<ChainResponse> = stream::iter(urls)
            .map(|url| {
                let client = self.client.clone();
                async move {
                    let response = client
                        .get(format!("{url}/blockchain"))
                        .timeout(timeout)
                        .send()
                        .await
                        .ok()?;
                    response.json::<ChainResponse>().await.ok()
                }
            })
            .buffer_unordered(fanout)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        let local = self.chain.snapshot();
        let mut best: Option<ChainResponse> = None;
        for candidate in candidates {
            if Chain::validate_chain(&candidate.blocks).is_err() {
                continue;
            }
            let current_best = best.as_ref().map(|b| b.blocks.as_slice()).unwrap_or(&local);
            if candidate_wins(current_best, &candidate.blocks) {
                best = Some(candidate);
            }
        }

        let Some(winner) = best else {
            return Ok(false);
        };
        if !candidate_wins(&local, &winner.blocks) {
            return Ok(false);
        }

        self.chain.replace(winner.blocks)?;
        // Per the mempool reconciliation rule: union of the winning
        // peer's own pending transactions with ours, minus whatever the
        // adopted chain now confirms. Admission errors (now-unaffordable,
        // already-confirmed) are expected here and simply drop the entry.
        for tx in winner.pending_transactions {
            let _ = self.mempool.admit(tx, self.chain.as_ref(), Amount::ZERO);
        }
        self.mempool.reconcile_after_replace(self.chain.as_ref());
        save_best_effort(
            self.store.as_ref(),
            SECTION_CHAIN,
            &serde_json::json!({ "blocks": self.chain.snapshot() }),
        );
        save_best_effort(
            self.store.as_ref(),
            crate::store::SECTION_MEMPOOL,
            &serde_json::json!(self.mempool.snapshot()),
        );
        tracing::info!(new_len = self.chain.len(), "replaced chain after sync");
        Ok(true)
    }
}

/// Owns the periodic sync ticker; a thin wrapper so `Node` can spawn and
/// abort it like the other background workers.
pub struct SyncScheduler {
    manager: Arc<SyncManager>,
}

impl SyncScheduler {
    pub fn new(manager: Arc<SyncManager>) -> Self {
        SyncScheduler { manager }
    }

    pub async fn run(&self, config: Arc<NodeConfig>) {
        let mut ticker = tokio::time::interval(config.sync_tick_interval());
        loop {
            ticker.tick().await;
            match self
                .manager
                .run_once(
                    config.peer_request_timeout(),
                    config.sync_cooldown(),
                    config.network.gossip_fanout_concurrency,
                )
                .await
            {
                Ok(true) => {}
                Ok(false) => tracing::debug!("sync round found no better chain"),
                Err(err) => tracing::debug!(error = %err, "sync round skipped"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::Block as BlockType;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn sync_round_with_no_peers_is_a_noop() {
        let chain = Arc::new(Chain::new(BlockType::genesis(1)));
        let mempool = Arc::new(Mempool::new());
        let peers = Arc::new(PeerSet::new("http://self:3000", 10));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let manager = SyncManager::new(chain, mempool, peers, store, reqwest::Client::new());
        let replaced = manager
            .sync_round(Duration::from_millis(100), 4)
            .await
            .unwrap();
        assert!(!replaced);
    }

    #[tokio::test]
    async fn second_sync_within_cooldown_is_skipped() {
        let chain = Arc::new(Chain::new(BlockType::genesis(1)));
        let mempool = Arc::new(Mempool::new());
        let peers = Arc::new(PeerSet::new("http://self:3000", 10));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let manager = SyncManager::new(chain, mempool, peers, store, reqwest::Client::new());
        manager
            .run_once(Duration::from_millis(100), Duration::from_secs(60), 4)
            .await
            .unwrap();
        let second = manager
            .run_once(Duration::from_millis(100), Duration::from_secs(60), 4)
            .await;
        assert!(matches!(second, Err(NodeError::SyncSkipped(_))));
    }
}

//! Block assembly and the mining loop: snapshot the mempool, run
//! cancellable proof-of-work, append the block, adjust difficulty, gossip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::blockchain::block::Block;
use crate::blockchain::chain::{Chain, ChainReader};
use crate::blockchain::transaction::Transaction;
use crate::blockchain::Mempool;
use crate::config::NodeConfig;
use crate::consensus::{adjust_difficulty, pow_search};
use crate::network::{Gossiper, PeerSet};
use crate::store::{save_best_effort, Store, SECTION_CHAIN};

/// Tracks whether mining is currently enabled (toggled by the
/// `/mining/start` and `/mining/stop` endpoints). Cancellation itself is
/// driven off the chain's own revision counter (see [`try_mine_one`]),
/// not anything this struct owns.
pub struct Miner {
    enabled: AtomicBool,
    mining: AtomicBool,
    last_block_intervals_ms: parking_lot::Mutex<std::collections::VecDeque<u64>>,
}

/// Rolling window size for the hashrate/interval estimate surfaced by
/// `/mining/status` and `/stats`.
const INTERVAL_WINDOW: usize = 16;

impl Miner {
    pub fn new() -> Self {
        Miner {
            enabled: AtomicBool::new(true),
            mining: AtomicBool::new(false),
            last_block_intervals_ms: parking_lot::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn average_block_interval_ms(&self) -> Option<u64> {
        let window = self.last_block_intervals_ms.lock();
        if window.is_empty() {
            return None;
        }
        Some(window.iter().sum::<u64>() / window.len() as u64)
    }

    fn record_interval(&self, interval_ms: u64) {
        let mut window = self.last_block_intervals_ms.lock();
        window.push_back(interval_ms);
        if window.len() > INTERVAL_WINDOW {
            window.pop_front();
        }
    }

    /// One mining attempt: snapshots the tip and mempool, runs PoW, and
    /// appends the block if the search wasn't cancelled by a concurrent
    /// chain change. Returns the newly appended block, or `None` if
    /// mining is disabled, the mempool is empty, another mining attempt
    /// is already in flight, or the search was cancelled.
    pub async fn try_mine_one(
        self: &Arc<Self>,
        chain: Arc<Chain>,
        mempool: Arc<Mempool>,
        config: &NodeConfig,
    ) -> Option<Block> {
        if !self.is_enabled() || mempool.is_empty() {
            return None;
        }
        if self
            .mining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let _guard = MiningGuard(self);

        let tip = chain.tip();
        let revision_at_start = chain.revision();
        let pending = mempool.take(config.mining.max_tx_per_block);
        let pending_ids: Vec<_> = pending.iter().map(|tx| tx.transaction_id).collect();
        // The coinbase mints exactly `miningReward`, per spec.md §4.E step 4
        // and §3 invariant 6 — collected fees are not added to it, and the
        // spec names no mechanism for distributing them elsewhere.
        let coinbase = Transaction::coinbase(config.mining.miner_address.clone(), config.mining.mining_reward);

        let mut transactions = pending;
        transactions.push(coinbase);
        let total_fees = Block::total_fees_of(&transactions);

        let chain_for_search = chain.clone();
        let previous_hash = tip.hash.clone();
        let index = tip.index + 1;
        let difficulty = tip.difficulty;
        let txs_for_search = transactions.clone();
        // PoW runs on a blocking thread so the async runtime keeps serving
        // HTTP requests and other workers while mining saturates a core.
        // Cancellation polls the chain's own revision counter directly,
        // so any append or sync replacement aborts this search, not just
        // one this miner instance caused.
        let search_result = tokio::task::spawn_blocking(move || {
            pow_search(
                &previous_hash,
                &txs_for_search,
                index,
                difficulty,
                revision_at_start,
                move || chain_for_search.revision(),
            )
        })
        .await
        .ok()
        .flatten();

        let Some(result) = search_result else {
            return None;
        };

        let actual_interval_ms = crate::blockchain::transaction::now_millis().saturating_sub(tip.timestamp);
        let new_difficulty = adjust_difficulty(
            difficulty,
            actual_interval_ms,
            config.mining.target_block_interval_ms,
        );

        let block = Block {
            index,
            timestamp: crate::blockchain::transaction::now_millis(),
            transactions,
            previous_block_hash: tip.hash.clone(),
            nonce: result.nonce,
            hash: result.hash,
            difficulty: new_difficulty,
            total_fees,
        };

        match chain.append_validated(block.clone(), config.mining.min_fee) {
            Ok(()) => {
                mempool.evict_confirmed(&pending_ids);
                self.record_interval(block.timestamp.saturating_sub(tip.timestamp));
                Some(block)
            }
            Err(err) => {
                tracing::warn!(error = %err, "mined block rejected by append_validated");
                None
            }
        }
    }
}

impl Default for Miner {
    fn default() -> Self {
        Miner::new()
    }
}

/// Clears the `mining` in-flight flag on every exit path from
/// `try_mine_one`, including an early return or a future that's dropped
/// before completion.
struct MiningGuard<'a>(&'a Miner);

impl Drop for MiningGuard<'_> {
    fn drop(&mut self) {
        self.0.mining.store(false, Ordering::SeqCst);
    }
}

/// Background worker: polls on `mining.poll_interval_ms`, mines at most
/// one block per tick, persists the chain best-effort, and gossips the
/// new block to known peers.
pub async fn run_mining_loop(
    miner: Arc<Miner>,
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    peers: Arc<PeerSet>,
    gossiper: Arc<Gossiper>,
    store: Arc<dyn Store>,
    config: Arc<NodeConfig>,
) {
    let mut ticker = tokio::time::interval(config.poll_interval());
    loop {
        ticker.tick().await;
        if let Some(block) = miner
            .try_mine_one(chain.clone(), mempool.clone(), config.as_ref())
            .await
        {
            tracing::info!(index = block.index, hash = %block.hash, "mined block");
            save_best_effort(
                store.as_ref(),
                SECTION_CHAIN,
                &serde_json::json!({ "blocks": chain.snapshot() }),
            );
            save_best_effort(
                store.as_ref(),
                crate::store::SECTION_MEMPOOL,
                &serde_json::json!(mempool.snapshot()),
            );
            gossiper.broadcast_block(peers.as_ref(), &block).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::blockchain::block::Block as BlockType;
    use crate::hash::encode_address;

    #[tokio::test]
    async fn try_mine_one_appends_a_block_when_enabled() {
        let chain = Arc::new(Chain::new(BlockType::genesis(1)));
        let mempool = Arc::new(Mempool::new());
        let miner = Arc::new(Miner::new());
        let mut config = NodeConfig::default();
        config.mining.difficulty = 1;
        config.mining.miner_address = encode_address(&[3; 20]);

        let faucet_tx = Transaction::new(
            "FAUCET",
            encode_address(&[4; 20]),
            Amount::from_f64(100.0),
            Amount::ZERO,
        );
        mempool.admit(faucet_tx, chain.as_ref(), config.mining.min_fee).unwrap();

        let block = miner.try_mine_one(chain.clone(), mempool, &config).await;
        assert!(block.is_some());
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test]
    async fn try_mine_one_returns_none_on_empty_mempool() {
        let chain = Arc::new(Chain::new(BlockType::genesis(1)));
        let mempool = Arc::new(Mempool::new());
        let miner = Arc::new(Miner::new());
        let mut config = NodeConfig::default();
        config.mining.difficulty = 1;

        let block = miner.try_mine_one(chain.clone(), mempool, &config).await;
        assert!(block.is_none());
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn try_mine_one_returns_none_when_disabled() {
        let chain = Arc::new(Chain::new(BlockType::genesis(1)));
        let mempool = Arc::new(Mempool::new());
        let miner = Arc::new(Miner::new());
        miner.stop();
        let config = NodeConfig::default();
        let block = miner.try_mine_one(chain, mempool, &config).await;
        assert!(block.is_none());
    }

    #[tokio::test]
    async fn concurrent_invocation_is_skipped_while_one_is_in_flight() {
        let chain = Arc::new(Chain::new(BlockType::genesis(1)));
        let mempool = Arc::new(Mempool::new());
        let miner = Arc::new(Miner::new());
        let config = NodeConfig::default();

        assert!(!miner.mining.swap(true, Ordering::SeqCst));
        let block = miner.try_mine_one(chain, mempool, &config).await;
        assert!(block.is_none());
    }
}

//! The canonical chain: an atomically-swapped block vector plus the
//! structural/cryptographic/economic validation that keeps it honest.
//!
//! The block vector lives behind an `arc_swap::ArcSwap`, so a reader never
//! blocks on a writer and a `replace` is a single pointer swap — readers
//! either see the whole old chain or the whole new one, never a partial
//! splice. A `parking_lot::Mutex<()>` serializes the (rare) writers: the
//! miner appending its own block and the sync manager replacing the tip.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::blockchain::block::Block;
use crate::blockchain::traits::{ChainReader, ChainWriter};
use crate::blockchain::transaction::{Transaction, TransactionId};
use crate::error::NodeError;
use crate::hash::is_reserved_sender;

/// Everything the `/address/:addr` endpoint reports for one address:
/// current balance plus the transactions it appears in, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressData {
    pub address: String,
    pub balance: Amount,
    pub sent: Amount,
    pub received: Amount,
    pub fees: Amount,
    pub count: usize,
    pub transactions: Vec<Transaction>,
}

/// Ranks a candidate chain against ours for fork choice: longer wins; ties
/// break on a total-work proxy (`Σ 2^difficulty` over all blocks); further
/// ties keep whichever chain was observed first. Only the
/// sync manager calls this — it is not part of `ChainWriter`/`ChainReader`
/// because local append never needs to compare forks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChainRank {
    pub length: usize,
    pub work: u128,
}

pub fn rank_of(blocks: &[Block]) -> ChainRank {
    let work = blocks
        .iter()
        .map(|b| 1u128.checked_shl(b.difficulty).unwrap_or(u128::MAX))
        .fold(0u128, |acc, w| acc.saturating_add(w));
    ChainRank {
        length: blocks.len(),
        work,
    }
}

/// `true` if `candidate` should replace `current` under the fork-choice
/// rule above. Equal rank keeps the incumbent (first-observed wins).
pub fn candidate_wins(current: &[Block], candidate: &[Block]) -> bool {
    rank_of(candidate) > rank_of(current)
}

pub struct Chain {
    blocks: ArcSwap<Vec<Block>>,
    write_lock: parking_lot::Mutex<()>,
    revision: AtomicU64,
}

impl Chain {
    pub fn new(genesis: Block) -> Self {
        Chain {
            blocks: ArcSwap::new(Arc::new(vec![genesis])),
            write_lock: parking_lot::Mutex::new(()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, NodeError> {
        Chain::validate_chain(&blocks)?;
        Ok(Chain {
            blocks: ArcSwap::new(Arc::new(blocks)),
            write_lock: parking_lot::Mutex::new(()),
            revision: AtomicU64::new(0),
        })
    }

    /// Structural, cryptographic, and economic replay of a whole candidate
    /// chain. Shared by construction-from-persisted-state, single-block
    /// append, and whole-chain sync replacement, so there is exactly one
    /// place chain validity is decided.
    pub fn validate_chain(blocks: &[Block]) -> Result<(), NodeError> {
        let Some(genesis) = blocks.first() else {
            return Err(NodeError::ChainInvalid("chain has no genesis block".into()));
        };
        if !genesis.is_genesis() {
            return Err(NodeError::ChainInvalid("first block is not genesis".into()));
        }

        let mut seen_tx_ids: HashSet<TransactionId> = HashSet::new();

        for window in blocks.windows(2) {
            let (prev, block) = (&window[0], &window[1]);
            if block.index != prev.index + 1 {
                return Err(NodeError::ChainInvalid(format!(
                    "block {} does not follow block {} in sequence",
                    block.index, prev.index
                )));
            }
            if block.previous_block_hash != prev.hash {
                return Err(NodeError::ChainInvalid(format!(
                    "block {} previousBlockHash does not match block {} hash",
                    block.index, prev.index
                )));
            }
            let recomputed = block.recomputed_hash();
            if recomputed != block.hash {
                return Err(NodeError::ChainInvalid(format!(
                    "block {} hash does not match its contents",
                    block.index
                )));
            }
            if !Block::hash_meets_difficulty(&block.hash, block.difficulty) {
                return Err(NodeError::ChainInvalid(format!(
                    "block {} hash does not satisfy its declared difficulty",
                    block.index
                )));
            }

            let coinbase_count = block.transactions.iter().filter(|tx| tx.is_coinbase()).count();
            if coinbase_count > 1 {
                return Err(NodeError::ChainInvalid(format!(
                    "block {} has more than one coinbase transaction",
                    block.index
                )));
            }

            let expected_fees = Block::total_fees_of(&block.transactions);
            if expected_fees != block.total_fees {
                return Err(NodeError::ChainInvalid(format!(
                    "block {} declares totalFees {} but transactions sum to {}",
                    block.index, block.total_fees, expected_fees
                )));
            }

            for tx in &block.transactions {
                if !seen_tx_ids.insert(tx.transaction_id) {
                    return Err(NodeError::ChainInvalid(format!(
                        "duplicate transaction id {} in chain",
                        tx.transaction_id
                    )));
                }
                // Shape/fee-floor validation is re-run with a zero floor:
                // the floor at acceptance time may have changed since, and
                // structural replay must not retroactively invalidate a
                // block mined under an older floor. Shape (self-send,
                // zero amount, address format) still applies unconditionally.
                tx.validate_shape(Amount::ZERO)?;
            }
        }

        // Balance replay: every sender must have been able to afford its
        // debit at the point the transaction appears, coinbase/system
        // senders exempted.
        let mut balances: std::collections::HashMap<&str, Amount> = std::collections::HashMap::new();
        for block in blocks {
            for tx in &block.transactions {
                if !is_reserved_sender(&tx.sender) {
                    let debit = tx.amount.checked_add(tx.fee).ok_or_else(|| {
                        NodeError::ChainInvalid("transaction debit overflows amount range".into())
                    })?;
                    let balance = balances.get(tx.sender.as_str()).copied().unwrap_or(Amount::ZERO);
                    let new_balance = balance.checked_sub(debit).ok_or_else(|| {
                        NodeError::ChainInvalid(format!(
                            "transaction {} overdraws sender {}",
                            tx.transaction_id, tx.sender
                        ))
                    })?;
                    balances.insert(tx.sender.as_str(), new_balance);
                }
                let credit = balances.get(tx.recipient.as_str()).copied().unwrap_or(Amount::ZERO);
                balances.insert(tx.recipient.as_str(), credit + tx.amount);
            }
        }

        Ok(())
    }

    /// Appends a single locally-mined block after re-validating the whole
    /// resulting chain. Bumps the revision counter so any in-flight PoW
    /// search observes the tip changed and aborts.
    pub fn append_validated(&self, block: Block, min_fee: Amount) -> Result<(), NodeError> {
        let _guard = self.write_lock.lock();
        let mut candidate = (**self.blocks.load()).clone();
        let tip = candidate.last().expect("chain always has a genesis block");
        if block.previous_block_hash != tip.hash {
            return Err(NodeError::InvalidBlock(
                "block does not extend the current tip".into(),
            ));
        }
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                tx.validate_shape(min_fee)?;
            }
        }
        candidate.push(block);
        Chain::validate_chain(&candidate)?;
        self.blocks.store(Arc::new(candidate));
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Inbound single-block append from a peer's `/receive-new-block`
    /// push. Silently rejects anything that doesn't extend the tip or
    /// fails validation: a bad push from one peer must not disrupt the
    /// node.
    pub fn receive_new_block(&self, block: Block, min_fee: Amount) -> Result<(), NodeError> {
        match self.append_validated(block, min_fee) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::debug!(error = %err, "rejected inbound block");
                Err(err)
            }
        }
    }

    /// Atomically replaces the whole chain, used only by the sync manager
    /// after it has picked a winning fork via [`candidate_wins`] and
    /// re-validated it end to end. The swap itself cannot partially fail;
    /// the caller is responsible for rolling back its own mempool
    /// reconciliation if persisting the new chain afterwards fails.
    pub fn replace(&self, blocks: Vec<Block>) -> Result<(), NodeError> {
        Chain::validate_chain(&blocks)?;
        let _guard = self.write_lock.lock();
        self.blocks.store(Arc::new(blocks));
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn transaction_by_id(&self, id: TransactionId) -> Option<(Transaction, u64)> {
        let blocks = self.blocks.load();
        blocks.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| tx.transaction_id == id)
                .map(|tx| (tx.clone(), block.index))
        })
    }
}

impl ChainReader for Chain {
    fn tip(&self) -> Block {
        self.blocks.load().last().expect("chain always has a genesis block").clone()
    }

    fn len(&self) -> usize {
        self.blocks.load().len()
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Vec<Block> {
        (**self.blocks.load()).clone()
    }

    fn balance_of(&self, address: &str) -> Amount {
        let blocks = self.blocks.load();
        let mut balance = Amount::ZERO;
        for block in blocks.iter() {
            for tx in &block.transactions {
                if tx.sender == address {
                    balance = balance.checked_sub(tx.amount + tx.fee).unwrap_or(Amount::ZERO);
                }
                if tx.recipient == address {
                    balance = balance + tx.amount;
                }
            }
        }
        balance
    }

    fn address_data(&self, address: &str) -> AddressData {
        let blocks = self.blocks.load();
        let mut balance = Amount::ZERO;
        let mut sent = Amount::ZERO;
        let mut received = Amount::ZERO;
        let mut fees = Amount::ZERO;
        let mut transactions = Vec::new();
        for block in blocks.iter() {
            for tx in &block.transactions {
                if tx.sender == address {
                    balance = balance.checked_sub(tx.amount + tx.fee).unwrap_or(Amount::ZERO);
                    sent = sent + tx.amount;
                    fees = fees + tx.fee;
                    transactions.push(tx.clone());
                } else if tx.recipient == address {
                    balance = balance + tx.amount;
                    received = received + tx.amount;
                    transactions.push(tx.clone());
                }
            }
        }
        let count = transactions.len();
        transactions.reverse();
        AddressData {
            address: address.to_string(),
            balance,
            sent,
            received,
            fees,
            count,
            transactions,
        }
    }

    fn block_by_hash(&self, hash: &str) -> Option<Block> {
        self.blocks.load().iter().find(|b| b.hash == hash).cloned()
    }

    fn total_supply(&self) -> Amount {
        self.blocks
            .load()
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| is_reserved_sender(&tx.sender))
            .map(|tx| tx.amount)
            .sum()
    }

    fn transaction_by_id(&self, id: TransactionId) -> Option<(Transaction, u64)> {
        Chain::transaction_by_id(self, id)
    }
}

impl ChainWriter for Chain {
    fn append_validated(&self, block: Block, min_fee: Amount) -> Result<(), NodeError> {
        Chain::append_validated(self, block, min_fee)
    }

    fn receive_new_block(&self, block: Block, min_fee: Amount) -> Result<(), NodeError> {
        Chain::receive_new_block(self, block, min_fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::encode_address;

    fn addr(byte: u8) -> String {
        encode_address(&[byte; 20])
    }

    fn mine_next(chain: &Chain, transactions: Vec<Transaction>, miner: &str) -> Block {
        let tip = chain.tip();
        let mut total_fees = Block::total_fees_of(&transactions);
        let mut txs = transactions;
        let reward = Amount::from_f64(12.5);
        txs.push(Transaction::coinbase(miner, reward + total_fees));
        total_fees = Block::total_fees_of(&txs);
        let difficulty = 1;
        let index = tip.index + 1;
        let mut nonce = 0u64;
        loop {
            let hash = Block::compute_hash(&tip.hash, nonce, &txs, index);
            if Block::hash_meets_difficulty(&hash, difficulty) {
                return Block {
                    index,
                    timestamp: crate::blockchain::transaction::now_millis(),
                    transactions: txs,
                    previous_block_hash: tip.hash.clone(),
                    nonce,
                    hash,
                    difficulty,
                    total_fees,
                };
            }
            nonce += 1;
        }
    }

    #[test]
    fn genesis_only_chain_is_valid() {
        let chain = Chain::new(Block::genesis(1));
        assert_eq!(chain.len(), 1);
        assert!(Chain::validate_chain(&chain.snapshot()).is_ok());
    }

    #[test]
    fn append_validated_extends_tip_and_bumps_revision() {
        let chain = Chain::new(Block::genesis(1));
        let rev_before = chain.revision();
        let block = mine_next(&chain, vec![], &addr(1));
        chain.append_validated(block, Amount::from_f64(0.001)).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.revision(), rev_before + 1);
    }

    #[test]
    fn append_rejects_block_not_extending_tip() {
        let chain = Chain::new(Block::genesis(1));
        let mut block = mine_next(&chain, vec![], &addr(1));
        block.previous_block_hash = "not-the-tip".into();
        block.hash = block.recomputed_hash();
        assert!(chain.append_validated(block, Amount::from_f64(0.001)).is_err());
    }

    #[test]
    fn balance_of_reflects_coinbase_and_spend() {
        let chain = Chain::new(Block::genesis(1));
        let miner = addr(1);
        let block = mine_next(&chain, vec![], &miner);
        chain.append_validated(block, Amount::from_f64(0.001)).unwrap();
        assert_eq!(chain.balance_of(&miner).to_f64(), 12.5);
    }

    #[test]
    fn validate_chain_rejects_duplicate_transaction_ids() {
        let chain = Chain::new(Block::genesis(1));
        let tx = Transaction::coinbase(addr(1), Amount::from_f64(12.5));
        let mut blocks = chain.snapshot();
        let mut b1 = mine_next(&chain, vec![], &addr(1));
        b1.transactions = vec![tx.clone()];
        b1.total_fees = Block::total_fees_of(&b1.transactions);
        b1.hash = b1.recomputed_hash();
        blocks.push(b1.clone());
        let mut b2 = b1.clone();
        b2.index += 1;
        b2.previous_block_hash = b1.hash.clone();
        b2.hash = b2.recomputed_hash();
        blocks.push(b2);
        assert!(Chain::validate_chain(&blocks).is_err());
    }

    #[test]
    fn candidate_wins_prefers_longer_chain() {
        let current = vec![Block::genesis(1)];
        let chain = Chain::new(Block::genesis(1));
        let extended = vec![Block::genesis(1), mine_next(&chain, vec![], &addr(1))];
        assert!(candidate_wins(&current, &extended));
        assert!(!candidate_wins(&extended, &current));
    }

    #[test]
    fn zero_indexed_remote_genesis_chain_validates() {
        let mut blocks = vec![Block::genesis(1)];
        blocks[0].index = 0;
        assert!(Chain::validate_chain(&blocks).is_ok());
    }

    #[test]
    fn total_supply_is_zero_for_genesis_only_chain() {
        let chain = Chain::new(Block::genesis(1));
        assert_eq!(chain.total_supply().to_f64(), 0.0);
    }

    #[test]
    fn total_supply_accumulates_coinbase_rewards() {
        let chain = Chain::new(Block::genesis(1));
        let miner = addr(1);
        chain.append_validated(mine_next(&chain, vec![], &miner), Amount::from_f64(0.001)).unwrap();
        chain.append_validated(mine_next(&chain, vec![], &miner), Amount::from_f64(0.001)).unwrap();
        assert_eq!(chain.total_supply().to_f64(), 25.0);
    }

    #[test]
    fn address_data_lists_transactions_newest_first() {
        let chain = Chain::new(Block::genesis(1));
        let miner = addr(1);
        let b1 = mine_next(&chain, vec![], &miner);
        chain.append_validated(b1, Amount::from_f64(0.001)).unwrap();
        let b2 = mine_next(&chain, vec![], &miner);
        chain.append_validated(b2, Amount::from_f64(0.001)).unwrap();
        let data = chain.address_data(&miner);
        assert_eq!(data.transactions.len(), 2);
        assert_eq!(data.balance.to_f64(), 25.0);
    }
}

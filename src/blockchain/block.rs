//! Block data model: cryptographic linkage, PoW-sealed hash, coinbase.

use serde::Serialize;

use crate::amount::Amount;
use crate::blockchain::transaction::{now_millis, Transaction};
use crate::hash::sha256_hex;

pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_HASH: &str = "0";
pub const GENESIS_NONCE: u64 = 100;
pub const GENESIS_INDEX: u64 = 1;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub previous_block_hash: String,
    pub nonce: u64,
    pub hash: String,
    pub difficulty: u32,
    pub total_fees: Amount,
}

/// Consensus-critical material: `transactions` then `index`, with stable
/// key order so every node hashes the same bytes for the same block.
#[derive(Serialize)]
struct BlockConsensusPayload<'a> {
    transactions: Vec<serde_json::Value>,
    index: u64,
    #[serde(skip)]
    _marker: std::marker::PhantomData<&'a ()>,
}

impl Block {
    /// The single, immutable genesis block: `nonce = 100`,
    /// `previousBlockHash = "0"`, `hash = "0"`, no transactions, and
    /// `index = 1` (blocks are indexed from one, not zero).
    pub fn genesis(difficulty: u32) -> Self {
        Block {
            index: GENESIS_INDEX,
            timestamp: now_millis(),
            transactions: Vec::new(),
            previous_block_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: GENESIS_NONCE,
            hash: GENESIS_HASH.to_string(),
            difficulty,
            total_fees: Amount::ZERO,
        }
    }

    /// `true` for a well-formed genesis block. This node always mints its
    /// own genesis at `index = 1`, but a remote chain's genesis is
    /// tolerated at `index = 0` too: some peer implementations index
    /// blocks from zero, and rejecting them outright would needlessly
    /// break cross-implementation sync over an indexing convention that
    /// carries no consensus weight of its own (every later index is
    /// still checked relative to its predecessor, not to this constant).
    pub fn is_genesis(&self) -> bool {
        (self.index == GENESIS_INDEX || self.index == 0) && self.previous_block_hash == GENESIS_PREVIOUS_HASH
    }

    /// `previousBlockHash || decimal(nonce) || JSON({transactions, index})`.
    pub fn compute_hash(
        previous_block_hash: &str,
        nonce: u64,
        transactions: &[Transaction],
        index: u64,
    ) -> String {
        let payload = BlockConsensusPayload {
            transactions: transactions.iter().map(Transaction::to_consensus_json).collect(),
            index,
            _marker: std::marker::PhantomData,
        };
        let json = serde_json::to_string(&payload).expect("block payload always serializes");
        let material = format!("{previous_block_hash}{nonce}{json}");
        sha256_hex(material.as_bytes())
    }

    /// Recomputes this block's hash from its own constituents.
    pub fn recomputed_hash(&self) -> String {
        Block::compute_hash(
            &self.previous_block_hash,
            self.nonce,
            &self.transactions,
            self.index,
        )
    }

    /// `true` if `hash` has at least `difficulty` leading `'0'` hex chars.
    pub fn hash_meets_difficulty(hash: &str, difficulty: u32) -> bool {
        hash.chars().take(difficulty as usize).all(|c| c == '0')
    }

    pub fn total_fees_of(transactions: &[Transaction]) -> Amount {
        transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .map(|tx| tx.fee)
            .sum()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.is_coinbase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::encode_address;

    #[test]
    fn genesis_has_fixed_shape() {
        let g = Block::genesis(4);
        assert_eq!(g.index, 1);
        assert_eq!(g.nonce, 100);
        assert_eq!(g.previous_block_hash, "0");
        assert_eq!(g.hash, "0");
        assert!(g.transactions.is_empty());
        assert!(g.is_genesis());
    }

    #[test]
    fn zero_indexed_remote_genesis_is_still_recognized() {
        let mut g = Block::genesis(1);
        g.index = 0;
        assert!(g.is_genesis());
    }

    #[test]
    fn hash_meets_difficulty_counts_leading_zeros() {
        assert!(Block::hash_meets_difficulty("000abc", 3));
        assert!(!Block::hash_meets_difficulty("00 abc", 3));
        assert!(!Block::hash_meets_difficulty("0a0abc", 2));
    }

    #[test]
    fn recomputed_hash_is_deterministic() {
        let tx = Transaction::new(
            encode_address(&[1; 20]),
            encode_address(&[2; 20]),
            Amount::from_f64(1.0),
            Amount::from_f64(0.001),
        );
        let block = Block {
            index: 2,
            timestamp: 0,
            transactions: vec![tx],
            previous_block_hash: "abc".into(),
            nonce: 7,
            hash: String::new(),
            difficulty: 1,
            total_fees: Amount::from_f64(0.001),
        };
        let h1 = block.recomputed_hash();
        let h2 = block.recomputed_hash();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn total_fees_excludes_coinbase() {
        let addr = encode_address(&[9; 20]);
        let tx = Transaction::new(addr.clone(), encode_address(&[8; 20]), Amount::from_f64(1.0), Amount::from_f64(0.01));
        let coinbase = Transaction::coinbase(addr, Amount::from_f64(12.5));
        let total = Block::total_fees_of(&[tx, coinbase]);
        assert_eq!(total.to_f64(), 0.01);
    }
}

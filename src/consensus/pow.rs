//! Cancellable proof-of-work search.
//!
//! The miner runs this on a blocking thread. Every `CHECK_INTERVAL` nonces
//! it compares the chain's revision counter against the one it started
//! with; if the tip moved underneath it (another block was appended or
//! the chain was replaced by sync) the search abandons its candidate
//! without ever touching the mempool.

use crate::blockchain::block::Block;
use crate::blockchain::transaction::Transaction;

/// Nonces checked between each cancellation-flag poll.
pub const CHECK_INTERVAL: u64 = 4096;

pub struct SearchResult {
    pub nonce: u64,
    pub hash: String,
}

/// Searches nonces starting at 0 until a hash meeting `difficulty` is
/// found, or the search is cancelled because `current_revision()` no
/// longer matches `revision_at_start`. Pure and blocking — callers run it
/// via `tokio::task::spawn_blocking`. The revision check is a closure
/// rather than a raw atomic reference so the caller can poll the chain's
/// own revision counter (which lives behind an `Arc<Chain>`, not a bare
/// `AtomicU64` this function could borrow across the blocking call).
pub fn search(
    previous_block_hash: &str,
    transactions: &[Transaction],
    index: u64,
    difficulty: u32,
    revision_at_start: u64,
    current_revision: impl Fn() -> u64,
) -> Option<SearchResult> {
    let mut nonce: u64 = 0;
    loop {
        for _ in 0..CHECK_INTERVAL {
            let hash = Block::compute_hash(previous_block_hash, nonce, transactions, index);
            if Block::hash_meets_difficulty(&hash, difficulty) {
                return Some(SearchResult { nonce, hash });
            }
            nonce = nonce.wrapping_add(1);
        }
        if current_revision() != revision_at_start {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::hash::encode_address;

    #[test]
    fn finds_a_hash_meeting_low_difficulty() {
        let tx = Transaction::coinbase(encode_address(&[1; 20]), Amount::from_f64(12.5));
        let result = search("0", &[tx], 2, 1, 0, || 0).unwrap();
        assert!(Block::hash_meets_difficulty(&result.hash, 1));
    }

    #[test]
    fn cancels_when_revision_changes() {
        let tx = Transaction::coinbase(encode_address(&[1; 20]), Amount::from_f64(12.5));
        // Difficulty high enough that CHECK_INTERVAL nonces won't find it,
        // so the first poll sees the mismatched revision and bails.
        let result = search("0", &[tx], 2, 64, 0, || 5);
        assert!(result.is_none());
    }
}

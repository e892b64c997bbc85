//! Interface seams the rest of the node depends on, instead of depending
//! on `Chain` concretely, so callers can't accidentally couple to its
//! internal storage strategy.

use crate::amount::Amount;
use crate::blockchain::block::Block;
use crate::blockchain::chain::AddressData;
use crate::blockchain::transaction::TransactionId;
use crate::error::NodeError;

pub trait ChainReader: Send + Sync {
    fn tip(&self) -> Block;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn revision(&self) -> u64;
    fn snapshot(&self) -> Vec<Block>;
    fn balance_of(&self, address: &str) -> Amount;
    fn address_data(&self, address: &str) -> AddressData;
    /// Sum of every amount ever emitted by a reserved sender (coinbase
    /// rewards plus any node-local faucet/ecosystem issuance) — the
    /// total circulating supply this chain has created from nothing.
    fn total_supply(&self) -> Amount;
    fn block_by_hash(&self, hash: &str) -> Option<Block>;
    fn transaction_by_id(&self, id: TransactionId) -> Option<(crate::blockchain::transaction::Transaction, u64)>;
}

pub trait ChainWriter: ChainReader {
    fn append_validated(&self, block: Block, min_fee: Amount) -> Result<(), NodeError>;
    fn receive_new_block(&self, block: Block, min_fee: Amount) -> Result<(), NodeError>;
}

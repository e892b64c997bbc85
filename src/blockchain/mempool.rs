//! Pending transaction pool: concurrent admission, FIFO-ish drain order,
//! and reconciliation after the chain moves out from under it.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::amount::Amount;
use crate::blockchain::chain::ChainReader;
use crate::blockchain::transaction::{Transaction, TransactionId};
use crate::error::NodeError;

pub struct Mempool {
    transactions: DashMap<TransactionId, Transaction>,
    order: parking_lot::Mutex<VecDeque<TransactionId>>,
}

impl Mempool {
    pub fn new() -> Self {
        Mempool {
            transactions: DashMap::new(),
            order: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Validates shape/fee-floor, checks for an in-mempool duplicate id,
    /// and — since the caller has chain access — sufficient balance given
    /// everything else already pending from the same sender. Returns the
    /// accepted transaction's id.
    pub fn admit(
        &self,
        tx: Transaction,
        chain: &dyn ChainReader,
        min_fee: Amount,
    ) -> Result<TransactionId, NodeError> {
        tx.validate_shape(min_fee)?;

        if self.transactions.contains_key(&tx.transaction_id) {
            return Err(NodeError::DuplicateTransaction(format!(
                "transaction {} already pending",
                tx.transaction_id
            )));
        }

        if chain.transaction_by_id(tx.transaction_id).is_some() {
            return Err(NodeError::DuplicateTransaction(format!(
                "transaction {} already confirmed on chain",
                tx.transaction_id
            )));
        }

        if !crate::hash::is_reserved_sender(&tx.sender) {
            let confirmed_balance = chain.balance_of(&tx.sender);
            let pending_debit: Amount = self
                .transactions
                .iter()
                .filter(|entry| entry.sender == tx.sender)
                .map(|entry| entry.amount + entry.fee)
                .sum();
            let available = confirmed_balance.checked_sub(pending_debit).unwrap_or(Amount::ZERO);
            let debit = tx.amount.checked_add(tx.fee).ok_or_else(|| {
                NodeError::InvalidTransaction("amount plus fee overflows".into())
            })?;
            if available < debit {
                return Err(NodeError::InsufficientBalance(format!(
                    "sender {} has {} available, needs {}",
                    tx.sender, available, debit
                )));
            }
        }

        let id = tx.transaction_id;
        self.transactions.insert(id, tx);
        self.order.lock().push_back(id);
        Ok(id)
    }

    /// Every pending transaction in admission order, for persistence.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.take(usize::MAX)
    }

    /// Restores previously-admitted transactions from a persisted
    /// snapshot without re-running admission rules: they already passed
    /// them once, and re-validating against balances computed from a
    /// chain that may have moved since the last save would wrongly drop
    /// entries that are still perfectly valid. Duplicates (already
    /// present) are silently skipped.
    pub fn restore(&self, transactions: Vec<Transaction>) {
        for tx in transactions {
            if self.transactions.contains_key(&tx.transaction_id) {
                continue;
            }
            let id = tx.transaction_id;
            self.transactions.insert(id, tx);
            self.order.lock().push_back(id);
        }
    }

    /// Takes up to `n` pending transactions in admission order, without
    /// removing them — the miner commits the removal via
    /// [`Mempool::evict_confirmed`] once its block is actually appended.
    pub fn take(&self, n: usize) -> Vec<Transaction> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|id| self.transactions.get(id).map(|tx| tx.clone()))
            .take(n)
            .collect()
    }

    /// Removes transactions that made it into a newly-appended block.
    pub fn evict_confirmed(&self, ids: &[TransactionId]) {
        for id in ids {
            self.transactions.remove(id);
        }
        let mut order = self.order.lock();
        order.retain(|id| !ids.contains(id));
    }

    /// Drops any pending transaction that is already present in the new
    /// chain (now confirmed) or that the new chain's balances can no
    /// longer afford, called after the sync manager replaces the chain
    /// out from under this mempool.
    pub fn reconcile_after_replace(&self, chain: &dyn ChainReader) {
        let confirmed: std::collections::HashSet<TransactionId> = {
            let blocks = chain.snapshot();
            blocks
                .iter()
                .flat_map(|b| b.transactions.iter().map(|tx| tx.transaction_id))
                .collect()
        };

        let stale: Vec<TransactionId> = self
            .transactions
            .iter()
            .filter(|entry| confirmed.contains(entry.key()))
            .map(|entry| *entry.key())
            .collect();
        self.evict_confirmed(&stale);

        let mut spent: std::collections::HashMap<String, Amount> = std::collections::HashMap::new();
        let mut now_unaffordable = Vec::new();
        for id in self.order.lock().iter().copied().collect::<Vec<_>>() {
            let Some(tx) = self.transactions.get(&id).map(|t| t.clone()) else {
                continue;
            };
            if crate::hash::is_reserved_sender(&tx.sender) {
                continue;
            }
            let balance = chain.balance_of(&tx.sender);
            let already_spent = spent.get(&tx.sender).copied().unwrap_or(Amount::ZERO);
            let debit = tx.amount + tx.fee;
            match balance.checked_sub(already_spent) {
                Some(remaining) if remaining >= debit => {
                    spent.insert(tx.sender.clone(), already_spent + debit);
                }
                _ => now_unaffordable.push(id),
            }
        }
        self.evict_confirmed(&now_unaffordable);
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Mempool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::Block;
    use crate::blockchain::chain::Chain;
    use crate::hash::encode_address;

    fn addr(byte: u8) -> String {
        encode_address(&[byte; 20])
    }

    fn funded_chain(recipient: &str, amount: f64) -> Chain {
        let chain = Chain::new(Block::genesis(1));
        let tip = chain.tip();
        let reward = Amount::from_f64(amount);
        let coinbase = Transaction::coinbase(recipient, reward);
        let txs = vec![coinbase];
        let mut nonce = 0u64;
        loop {
            let hash = Block::compute_hash(&tip.hash, nonce, &txs, tip.index + 1);
            if Block::hash_meets_difficulty(&hash, 1) {
                let block = Block {
                    index: tip.index + 1,
                    timestamp: crate::blockchain::transaction::now_millis(),
                    transactions: txs.clone(),
                    previous_block_hash: tip.hash.clone(),
                    nonce,
                    hash,
                    difficulty: 1,
                    total_fees: Amount::ZERO,
                };
                chain.append_validated(block, Amount::from_f64(0.001)).unwrap();
                break;
            }
            nonce += 1;
        }
        chain
    }

    #[test]
    fn admit_accepts_affordable_transaction() {
        let sender = addr(1);
        let chain = funded_chain(&sender, 10.0);
        let mempool = Mempool::new();
        let tx = Transaction::new(sender, addr(2), Amount::from_f64(1.0), Amount::from_f64(0.001));
        assert!(mempool.admit(tx, &chain, Amount::from_f64(0.001)).is_ok());
    }

    #[test]
    fn admit_rejects_insufficient_balance() {
        let sender = addr(1);
        let chain = funded_chain(&sender, 1.0);
        let mempool = Mempool::new();
        let tx = Transaction::new(sender, addr(2), Amount::from_f64(10.0), Amount::from_f64(0.001));
        assert!(mempool.admit(tx, &chain, Amount::from_f64(0.001)).is_err());
    }

    #[test]
    fn admit_rejects_duplicate_id() {
        let sender = addr(1);
        let chain = funded_chain(&sender, 10.0);
        let mempool = Mempool::new();
        let tx = Transaction::new(sender, addr(2), Amount::from_f64(1.0), Amount::from_f64(0.001));
        let tx_clone = tx.clone();
        mempool.admit(tx, &chain, Amount::from_f64(0.001)).unwrap();
        assert!(mempool.admit(tx_clone, &chain, Amount::from_f64(0.001)).is_err());
    }

    #[test]
    fn admit_rejects_id_already_confirmed_on_chain() {
        let sender = addr(1);
        let chain = funded_chain(&sender, 10.0);
        let mempool = Mempool::new();
        let confirmed_tx = chain.tip().transactions[0].clone();
        let err = mempool.admit(confirmed_tx, &chain, Amount::from_f64(0.001)).unwrap_err();
        assert!(matches!(err, NodeError::DuplicateTransaction(_)));
    }

    #[test]
    fn take_then_evict_removes_committed_transactions() {
        let sender = addr(1);
        let chain = funded_chain(&sender, 10.0);
        let mempool = Mempool::new();
        let tx = Transaction::new(sender, addr(2), Amount::from_f64(1.0), Amount::from_f64(0.001));
        let id = mempool.admit(tx, &chain, Amount::from_f64(0.001)).unwrap();
        let taken = mempool.take(10);
        assert_eq!(taken.len(), 1);
        mempool.evict_confirmed(&[id]);
        assert!(mempool.is_empty());
    }

    #[test]
    fn restore_repopulates_without_reapplying_admission_rules() {
        let sender = addr(1);
        let chain = funded_chain(&sender, 10.0);
        let mempool = Mempool::new();
        let tx = Transaction::new(sender, addr(2), Amount::from_f64(1.0), Amount::from_f64(0.001));
        mempool.admit(tx, &chain, Amount::from_f64(0.001)).unwrap();
        let snapshot = mempool.snapshot();

        let restored = Mempool::new();
        restored.restore(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn second_spend_from_same_sender_exceeding_balance_is_rejected() {
        let sender = addr(1);
        let chain = funded_chain(&sender, 10.0);
        let mempool = Mempool::new();
        let tx1 = Transaction::new(sender.clone(), addr(2), Amount::from_f64(9.0), Amount::from_f64(0.001));
        let tx2 = Transaction::new(sender, addr(3), Amount::from_f64(5.0), Amount::from_f64(0.001));
        mempool.admit(tx1, &chain, Amount::from_f64(0.001)).unwrap();
        assert!(mempool.admit(tx2, &chain, Amount::from_f64(0.001)).is_err());
    }
}

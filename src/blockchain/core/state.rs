use crate::crypto::{PublicKey, TxId};
use crate::error::ChainError;
use crate::transaction::Transaction;
use std::collections::BTreeMap;

use super::chain::{Block, BlockStore};

/// Outputs not yet consumed on the chain this set was built for.
///
/// `apply_block` and `rollback_block` are not atomic on their own; callers run
/// them against a working copy and swap it in only on success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    entries: BTreeMap<TxId, Transaction>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &TxId) -> Option<&Transaction> {
        self.entries.get(id)
    }

    /// Returns false if an entry with the same identifier was already present.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        let id = tx.id();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, tx);
        true
    }

    pub fn remove(&mut self, id: &TxId) -> Option<Transaction> {
        self.entries.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.entries.values()
    }

    pub fn owned_by<'a>(&'a self, owner: &'a PublicKey) -> impl Iterator<Item = &'a Transaction> {
        self.entries.values().filter(move |tx| tx.output() == owner)
    }

    /// Each entry is worth exactly one coin.
    pub fn balance_of(&self, owner: &PublicKey) -> u64 {
        self.owned_by(owner).count() as u64
    }

    pub fn apply_block(&mut self, block: &Block) -> Result<(), ChainError> {
        for tx in block.transactions() {
            if let Some(input) = tx.input() {
                self.remove(input).ok_or_else(|| {
                    ChainError::NotFound(format!(
                        "Input {} spent by {} is not unspent",
                        input.short(),
                        tx.id().short()
                    ))
                })?;
            }
            if !self.insert(tx.clone()) {
                return Err(ChainError::InvalidBlock(format!(
                    "Transaction {} already unspent",
                    tx.id().short()
                )));
            }
        }
        Ok(())
    }

    /// Exact inverse of [`UtxoSet::apply_block`]. Spent outputs are restored
    /// from the store's transaction index.
    pub fn rollback_block(&mut self, block: &Block, store: &BlockStore) -> Result<(), ChainError> {
        for tx in block.transactions().iter().rev() {
            let id = tx.id();
            self.remove(&id).ok_or_else(|| {
                ChainError::NotFound(format!(
                    "Output {} of block {} missing during rollback",
                    id.short(),
                    block.hash().short()
                ))
            })?;

            if let Some(input) = tx.input() {
                let spent = store.transaction(input).ok_or_else(|| {
                    ChainError::NotFound(format!(
                        "Spent output {} not in transaction index",
                        input.short()
                    ))
                })?;
                self.insert(spent.clone());
            }
        }
        Ok(())
    }
}

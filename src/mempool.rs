//! Pending transaction pool
//!
//! Entries keep arrival order for FIFO block assembly. Two indexes give O(1)
//! lookups by transaction id and by the input an entry spends.

use crate::crypto::TxId;
use crate::error::ChainError;
use crate::transaction::Transaction;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct Mempool {
    entries: Vec<Transaction>,
    ids: HashSet<TxId>,
    /// input spent -> id of the pending transaction spending it
    by_input: HashMap<TxId, TxId>,
}

impl Mempool {
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
        self.ids.contains(id)
    }

    /// True if some pending transaction already spends `input`.
    pub fn spends(&self, input: &TxId) -> bool {
        self.by_input.contains_key(input)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.entries
    }

    /// Appends `tx`. The first transaction to claim an input wins; later ones
    /// are refused.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), ChainError> {
        let input = *tx.input().ok_or_else(|| {
            ChainError::InvalidTransaction("Coinbase records never enter the mempool".to_string())
        })?;
        let id = tx.id();

        if self.ids.contains(&id) {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} already pending",
                id.short()
            )));
        }
        if let Some(existing) = self.by_input.get(&input) {
            return Err(ChainError::DoubleSpendDetected(format!(
                "Input {} already spent by pending {}",
                input.short(),
                existing.short()
            )));
        }

        self.ids.insert(id);
        self.by_input.insert(input, id);
        self.entries.push(tx);
        Ok(())
    }

    /// Oldest `count` entries, in arrival order.
    pub fn head(&self, count: usize) -> Vec<Transaction> {
        self.entries.iter().take(count).cloned().collect()
    }

    pub fn remove_transactions<'a>(&mut self, ids: impl IntoIterator<Item = &'a TxId>) {
        let doomed: HashSet<TxId> = ids
            .into_iter()
            .filter(|id| self.ids.contains(*id))
            .copied()
            .collect();
        if doomed.is_empty() {
            return;
        }
        self.retain(|tx| !doomed.contains(&tx.id()));
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Transaction) -> bool) {
        let entries = std::mem::take(&mut self.entries);
        self.clear();
        for tx in entries {
            if keep(&tx) {
                // Entries were conflict-free before, so re-adding cannot fail.
                let _ = self.add_transaction(tx);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
        self.by_input.clear();
    }
}

//! Block notifications: ancestor pull, candidate validation, fork choice and
//! chain reorganization.
//!
//! A notification either changes nothing observable or moves the node to a
//! new tip with UTXO set and mempool rebuilt for that tip. All work happens on
//! working copies; `LedgerNode::state` is replaced only once every step has
//! succeeded, so a failed reorganization leaves the pre-notification state in
//! place.

use crate::blockchain::{validate_block, Block, UtxoSet};
use crate::consensus::{choose_fork, find_split_point, ChainCriteria, ForkChoice};
use crate::crypto::{BlockHash, TxId};
use crate::error::{ChainError, Result};
use crate::mempool::Mempool;
use crate::network::BlockSource;
use crate::node::{ChainState, LedgerNode};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// What a block notification did to the receiving node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Hash was already stored (or is the sentinel); nothing to do.
    AlreadyKnown,
    /// The sender could not supply the chain back to a known block.
    Unsubstantiated,
    /// Some candidate block failed validation; none were stored.
    Rejected,
    /// Candidates were valid and stored, but the chain is not longer.
    Stored { tip: BlockHash },
    /// The node switched to the notified chain.
    Adopted {
        tip: BlockHash,
        rolled_back: usize,
        applied: usize,
    },
}

impl BlockOutcome {
    pub fn is_adopted(&self) -> bool {
        matches!(self, BlockOutcome::Adopted { .. })
    }
}

/// Result of walking the UTXO set from one stored tip to another.
#[derive(Debug)]
struct Transition {
    utxo: UtxoSet,
    /// Blocks undone, newest first.
    rolled_back: Vec<BlockHash>,
    /// Blocks applied, oldest first.
    applied: Vec<BlockHash>,
}

impl LedgerNode {
    /// Handle a peer's claim that `hash` is its tip.
    ///
    /// Expected failures (unknown ancestry, invalid blocks, shorter chains) are
    /// reported through [`BlockOutcome`]. `Err` is reserved for
    /// [`ChainError::ReorgFailure`], raised only after the node's state has
    /// been left exactly as it was.
    pub fn notify_of_block(
        &mut self,
        hash: BlockHash,
        sender: &dyn BlockSource,
    ) -> Result<BlockOutcome> {
        if self.store.is_known(&hash) {
            return Ok(BlockOutcome::AlreadyKnown);
        }

        let candidates = match self.pull_ancestors(hash, sender) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(block = %hash.short(), "Sender could not substantiate block: {}", e);
                return Ok(BlockOutcome::Unsubstantiated);
            }
        };

        match self.validate_candidates(&candidates) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(block = %hash.short(), "Discarding candidate chain: {}", e);
                return Ok(BlockOutcome::Rejected);
            }
        }

        for (_, block) in candidates {
            self.store.insert(block).map_err(|e| {
                ChainError::ReorgFailure(format!("Validated block could not be stored: {}", e))
            })?;
        }

        let incumbent = ChainCriteria::from_store(&self.store, self.state.latest_hash)
            .map_err(|e| ChainError::ReorgFailure(e.to_string()))?;
        let candidate = ChainCriteria::from_store(&self.store, hash)
            .map_err(|e| ChainError::ReorgFailure(e.to_string()))?;

        if choose_fork(&incumbent, &candidate) == ForkChoice::KeepCurrent {
            debug!(
                block = %hash.short(),
                length = candidate.length,
                current = incumbent.length,
                "Stored side branch; keeping current chain"
            );
            return Ok(BlockOutcome::Stored { tip: hash });
        }

        self.reorganize(hash)
    }

    /// Fetch `hash` and its unknown ancestors from `sender`, oldest first.
    fn pull_ancestors(
        &self,
        hash: BlockHash,
        sender: &dyn BlockSource,
    ) -> Result<Vec<(BlockHash, Block)>> {
        let mut candidates = Vec::new();
        let mut visited = HashSet::new();
        let mut current = hash;

        while !self.store.is_known(&current) {
            if !visited.insert(current) {
                return Err(ChainError::InvalidBlock(format!(
                    "Ancestry of {} loops back to {}",
                    hash.short(),
                    current.short()
                )));
            }
            let block = sender.fetch_block(&current)?;
            let parent = block.previous_hash();
            candidates.push((current, block));
            current = parent;
        }

        candidates.reverse();
        Ok(candidates)
    }

    /// Validate candidates in chain order against a simulated running state
    /// seeded at the block they extend.
    fn validate_candidates(&self, candidates: &[(BlockHash, Block)]) -> Result<()> {
        let Some((_, first)) = candidates.first() else {
            return Ok(());
        };

        let mut running = self
            .transition(self.state.latest_hash, first.previous_hash())
            .map_err(|e| {
                ChainError::ReorgFailure(format!("Cannot rebuild state at fork point: {}", e))
            })?
            .utxo;

        for (claimed, block) in candidates {
            validate_block(
                block,
                claimed,
                &running,
                self.config.block_capacity,
                self.scheme.as_ref(),
            )?;
            running.apply_block(block)?;
        }
        Ok(())
    }

    /// Roll the live UTXO set back from `from` to its common ancestor with
    /// `to`, then forward to `to`. Works on a copy.
    fn transition(&self, from: BlockHash, to: BlockHash) -> Result<Transition> {
        let split = find_split_point(&self.store, from, to)?;
        let mut utxo = self.state.utxo.clone();

        let mut rolled_back = Vec::new();
        let mut current = from;
        while current != split {
            let block = self.store.get(&current)?;
            utxo.rollback_block(block, &self.store)?;
            rolled_back.push(current);
            current = block.previous_hash();
        }

        let applied = self.store.path_from(split, to)?;
        for hash in &applied {
            utxo.apply_block(self.store.get(hash)?)?;
        }

        Ok(Transition {
            utxo,
            rolled_back,
            applied,
        })
    }

    fn reorganize(&mut self, new_tip: BlockHash) -> Result<BlockOutcome> {
        let old_tip = self.state.latest_hash;

        let next = self
            .transition(old_tip, new_tip)
            .and_then(|transition| {
                let mempool = self.reconcile_mempool(&transition)?;
                Ok((transition, mempool))
            });

        let (transition, mempool) = match next {
            Ok(next) => next,
            Err(e) => {
                error!(
                    from = %old_tip.short(),
                    to = %new_tip.short(),
                    "Reorganization failed, keeping current chain: {}",
                    e
                );
                return Err(ChainError::ReorgFailure(e.to_string()));
            }
        };

        let rolled_back = transition.rolled_back.len();
        let applied = transition.applied.len();
        self.state = ChainState {
            utxo: transition.utxo,
            mempool,
            latest_hash: new_tip,
        };

        if rolled_back > 0 {
            info!(
                from = %old_tip.short(),
                to = %new_tip.short(),
                rolled_back,
                applied,
                "Reorganized to longer chain"
            );
        } else {
            info!(tip = %new_tip.short(), applied, "Extended chain");
        }

        Ok(BlockOutcome::Adopted {
            tip: new_tip,
            rolled_back,
            applied,
        })
    }

    /// Mempool for the post-transition chain: transactions from abandoned
    /// blocks first (oldest first), then the previous pending entries, keeping
    /// only those still spendable and not confirmed on the adopted branch.
    fn reconcile_mempool(&self, transition: &Transition) -> Result<Mempool> {
        let mut confirmed: HashSet<TxId> = HashSet::new();
        for hash in &transition.applied {
            confirmed.extend(self.store.get(hash)?.transactions().iter().map(|tx| tx.id()));
        }

        let mut returned = Vec::new();
        for hash in transition.rolled_back.iter().rev() {
            returned.extend(
                self.store
                    .get(hash)?
                    .transactions()
                    .iter()
                    .filter(|tx| !tx.is_coinbase())
                    .cloned(),
            );
        }

        let mut mempool = Mempool::new();
        for tx in returned
            .into_iter()
            .chain(self.state.mempool.transactions().iter().cloned())
        {
            let Some(input) = tx.input() else {
                continue;
            };
            if confirmed.contains(&tx.id())
                || mempool.contains(&tx.id())
                || !transition.utxo.contains(input)
                || mempool.spends(input)
            {
                continue;
            }
            // The spent record is identified by `input`, so a signature that
            // verified against it before still verifies now.
            mempool.add_transaction(tx)?;
        }
        Ok(mempool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::crypto::Secp256k1Scheme;
    use std::sync::Arc;

    fn node() -> LedgerNode {
        LedgerNode::new(LedgerConfig::default(), Arc::new(Secp256k1Scheme)).unwrap()
    }

    #[test]
    fn test_notify_adopts_and_is_idempotent() {
        let mut alice = node();
        let mut bob = node();
        alice.mine_block().unwrap();
        let tip = alice.mine_block().unwrap();

        let outcome = bob.notify_of_block(tip, &alice).unwrap();
        assert_eq!(
            outcome,
            BlockOutcome::Adopted {
                tip,
                rolled_back: 0,
                applied: 2
            }
        );
        assert_eq!(bob.latest_hash(), tip);
        assert_eq!(bob.utxo(), alice.utxo());

        let utxo = bob.utxo().clone();
        assert_eq!(
            bob.notify_of_block(tip, &alice).unwrap(),
            BlockOutcome::AlreadyKnown
        );
        assert_eq!(bob.utxo(), &utxo);
        assert_eq!(bob.latest_hash(), tip);
    }

    #[test]
    fn test_sentinel_notification_is_noop() {
        let alice = node();
        let mut bob = node();
        let sentinel = alice.latest_hash();
        assert_eq!(
            bob.notify_of_block(sentinel, &alice).unwrap(),
            BlockOutcome::AlreadyKnown
        );
    }

    #[test]
    fn test_unknown_hash_is_unsubstantiated() {
        let alice = node();
        let mut bob = node();
        let outcome = bob.notify_of_block(BlockHash([7u8; 32]), &alice).unwrap();
        assert_eq!(outcome, BlockOutcome::Unsubstantiated);
        assert!(bob.block_store().is_empty());
    }

    #[test]
    fn test_equal_length_keeps_incumbent() {
        let mut alice = node();
        let mut bob = node();
        let a_tip = alice.mine_block().unwrap();
        let b_tip = bob.mine_block().unwrap();

        let outcome = bob.notify_of_block(a_tip, &alice).unwrap();
        assert_eq!(outcome, BlockOutcome::Stored { tip: a_tip });
        assert_eq!(bob.latest_hash(), b_tip);
        assert!(bob.get_block(&a_tip).is_ok());
        assert_eq!(bob.balance(), 1);
    }

    #[test]
    fn test_reorg_returns_abandoned_transactions_to_mempool() {
        let mut alice = node();
        let mut carol = node();
        let shared = alice.mine_block().unwrap();
        carol.notify_of_block(shared, &alice).unwrap();

        // Both learn of a spend of alice's first coin.
        let tx = alice.create_transaction(carol.address()).unwrap();
        assert!(carol.submit_transaction(tx.clone()));

        // Carol confirms it on a branch of length 2.
        carol.mine_block().unwrap();
        assert!(carol.mempool().is_empty());
        assert_eq!(carol.balance(), 2);

        // Alice drops it and builds a branch of length 3.
        alice.clear_mempool();
        alice.mine_block().unwrap();
        let a_tip = alice.mine_block().unwrap();

        let outcome = carol.notify_of_block(a_tip, &alice).unwrap();
        assert_eq!(
            outcome,
            BlockOutcome::Adopted {
                tip: a_tip,
                rolled_back: 1,
                applied: 2
            }
        );
        assert_eq!(carol.latest_hash(), a_tip);
        assert_eq!(carol.balance(), 0);
        assert_eq!(carol.mempool(), &[tx]);
        assert_eq!(carol.utxo(), alice.utxo());
        carol.audit().unwrap();
    }

    #[test]
    fn test_reorg_drops_pending_transactions_spent_by_new_branch() {
        let mut alice = node();
        let mut carol = node();
        let shared = alice.mine_block().unwrap();
        carol.notify_of_block(shared, &alice).unwrap();

        let tx = alice.create_transaction(carol.address()).unwrap();
        assert!(carol.submit_transaction(tx.clone()));

        // Alice confirms it on a longer chain; carol's pending copy is stale.
        let a_tip = alice.mine_block().unwrap();
        carol.notify_of_block(a_tip, &alice).unwrap();

        assert!(carol.mempool().is_empty());
        assert_eq!(carol.balance(), 1);
        carol.audit().unwrap();
    }

    #[test]
    fn test_failed_reorg_restores_state() {
        let mut alice = node();
        let mut carol = node();
        let shared = alice.mine_block().unwrap();
        carol.notify_of_block(shared, &alice).unwrap();

        let tx = alice.create_transaction(carol.address()).unwrap();
        carol.submit_transaction(tx.clone());
        carol.mine_block().unwrap();

        alice.clear_mempool();
        alice.mine_block().unwrap();
        let a_tip = alice.mine_block().unwrap();

        // Corrupt carol's index so the spend in her branch cannot be undone.
        carol.store.transactions_mut_for_test().remove(tx.input().unwrap());
        let before_utxo = carol.utxo().clone();
        let before_tip = carol.latest_hash();
        let before_mempool = carol.mempool().to_vec();

        let err = carol.notify_of_block(a_tip, &alice).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(carol.utxo(), &before_utxo);
        assert_eq!(carol.latest_hash(), before_tip);
        assert_eq!(carol.mempool(), before_mempool.as_slice());
    }
}

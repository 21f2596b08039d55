//! Ledger node: UTXO bookkeeping, mempool admission and block production.
//!
//! Block notifications, fork choice and reorganization live in [`crate::sync`].

use crate::blockchain::{Block, BlockStore, UtxoSet};
use crate::config::{LedgerConfig, COINBASE_NONCE_LEN};
use crate::crypto::{BlockHash, KeyPair, PublicKey, SignatureScheme, TxId};
use crate::error::{ChainError, Result};
use crate::mempool::Mempool;
use crate::transaction::Transaction;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a top-level operation may change, replaced as one unit.
#[derive(Debug, Clone)]
pub(crate) struct ChainState {
    pub(crate) utxo: UtxoSet,
    pub(crate) mempool: Mempool,
    pub(crate) latest_hash: BlockHash,
}

pub struct LedgerNode {
    pub(crate) config: LedgerConfig,
    pub(crate) scheme: Arc<dyn SignatureScheme>,
    keys: KeyPair,
    pub(crate) store: BlockStore,
    pub(crate) state: ChainState,
}

impl std::fmt::Debug for LedgerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerNode")
            .field("address", &self.keys.public_key)
            .field("latest_hash", &self.state.latest_hash)
            .field("blocks", &self.store.len())
            .field("utxo", &self.state.utxo.len())
            .field("mempool", &self.state.mempool.len())
            .finish()
    }
}

impl LedgerNode {
    /// Create a node with a freshly generated key pair.
    pub fn new(config: LedgerConfig, scheme: Arc<dyn SignatureScheme>) -> Result<Self> {
        let keys = scheme.generate_keypair()?;
        Self::with_keys(config, scheme, keys)
    }

    pub fn with_keys(
        config: LedgerConfig,
        scheme: Arc<dyn SignatureScheme>,
        keys: KeyPair,
    ) -> Result<Self> {
        config.validate()?;
        let sentinel = config.genesis_sentinel;
        Ok(LedgerNode {
            config,
            scheme,
            keys,
            store: BlockStore::new(sentinel),
            state: ChainState {
                utxo: UtxoSet::new(),
                mempool: Mempool::new(),
                latest_hash: sentinel,
            },
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn address(&self) -> &PublicKey {
        &self.keys.public_key
    }

    pub fn utxo(&self) -> &UtxoSet {
        &self.state.utxo
    }

    pub fn mempool(&self) -> &[Transaction] {
        self.state.mempool.transactions()
    }

    pub fn latest_hash(&self) -> BlockHash {
        self.state.latest_hash
    }

    pub fn block_store(&self) -> &BlockStore {
        &self.store
    }

    pub fn get_block(&self, hash: &BlockHash) -> Result<&Block> {
        self.store.get(hash)
    }

    /// Number of blocks on the adopted chain.
    pub fn chain_height(&self) -> u64 {
        self.store.height(&self.state.latest_hash).unwrap_or(0)
    }

    /// Hashes of the adopted chain, genesis first.
    pub fn best_chain(&self) -> Vec<BlockHash> {
        let mut chain: Vec<_> = self
            .store
            .ancestors(self.state.latest_hash)
            .map(|(hash, _)| hash)
            .collect();
        chain.reverse();
        chain
    }

    /// Coins this node can spend on its adopted chain.
    pub fn balance(&self) -> u64 {
        self.state.utxo.balance_of(&self.keys.public_key)
    }

    /// Admit `tx` to the local mempool. Rejections leave the node untouched.
    ///
    /// Does not forward anything; peers are reached through
    /// [`crate::network::Network`].
    pub fn submit_transaction(&mut self, tx: Transaction) -> bool {
        let id = tx.id();
        match self.admit_transaction(tx) {
            Ok(()) => {
                debug!(tx = %id.short(), "Transaction admitted to mempool");
                true
            }
            Err(e) => {
                debug!(tx = %id.short(), "Transaction rejected: {}", e);
                false
            }
        }
    }

    fn admit_transaction(&mut self, tx: Transaction) -> Result<()> {
        let input = *tx.input().ok_or_else(|| {
            ChainError::InvalidTransaction("Coinbase records are only created by miners".to_string())
        })?;

        if self.state.mempool.spends(&input) {
            return Err(ChainError::DoubleSpendDetected(format!(
                "Input {} already spent by a pending transaction",
                input.short()
            )));
        }

        // Checks the input is unspent and signed by the key that owns it.
        tx.validate(&self.state.utxo, self.scheme.as_ref())?;
        self.state.mempool.add_transaction(tx)
    }

    /// Spend the first owned coin not already claimed by a pending transaction,
    /// paying it to `target`. The transaction is admitted locally and returned.
    pub fn create_transaction(&mut self, target: &PublicKey) -> Option<Transaction> {
        let input: TxId = self
            .state
            .utxo
            .owned_by(&self.keys.public_key)
            .map(|coin| coin.id())
            .find(|id| !self.state.mempool.spends(id))?;

        let message = Transaction::signable_message(&input, target);
        let signature = match self.scheme.sign(&message, &self.keys.private_key) {
            Ok(signature) => signature,
            Err(e) => {
                warn!("Failed to sign transaction: {}", e);
                return None;
            }
        };

        let tx = Transaction::new(target.clone(), Some(input), signature);
        if self.submit_transaction(tx.clone()) {
            Some(tx)
        } else {
            None
        }
    }

    pub fn clear_mempool(&mut self) {
        self.state.mempool.clear();
    }

    /// Assemble a block from the mempool head plus one coinbase paying this
    /// node, and adopt it as the new tip.
    ///
    /// Always produces a block; an error means local state was already
    /// inconsistent and nothing was changed.
    pub fn mine_block(&mut self) -> Result<BlockHash> {
        let mut transactions = self.state.mempool.head(self.config.block_capacity - 1);
        transactions.push(Transaction::coinbase(
            self.keys.public_key.clone(),
            COINBASE_NONCE_LEN,
        ));
        let block = Block::new(self.state.latest_hash, transactions);
        let included: Vec<TxId> = block.transactions().iter().map(|tx| tx.id()).collect();

        let mut next = self.state.clone();
        next.utxo.apply_block(&block)?;
        next.mempool.remove_transactions(&included);

        let hash = self.store.insert(block)?;
        next.latest_hash = hash;
        self.state = next;

        info!(
            block = %hash.short(),
            height = self.chain_height(),
            transactions = included.len(),
            "Mined new block"
        );
        Ok(hash)
    }

    /// UTXO set obtained by applying the adopted chain from genesis in one pass.
    pub fn replay_utxo(&self) -> Result<UtxoSet> {
        let mut utxo = UtxoSet::new();
        for hash in self.store.path_from(self.store.sentinel(), self.state.latest_hash)? {
            utxo.apply_block(self.store.get(&hash)?)?;
        }
        Ok(utxo)
    }

    /// Check that the live UTXO set matches a full replay of the adopted chain.
    pub fn audit(&self) -> Result<()> {
        let replayed = self.replay_utxo()?;
        if replayed != self.state.utxo {
            return Err(ChainError::ReorgFailure(format!(
                "Live UTXO set ({} entries) diverges from replay of chain ({} entries)",
                self.state.utxo.len(),
                replayed.len()
            )));
        }
        Ok(())
    }
}

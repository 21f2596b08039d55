use crate::crypto::{sha256, BlockHash, TxId};
use crate::error::ChainError;
use crate::transaction::Transaction;
use std::collections::HashMap;

/// An ordered batch of transactions chained to its predecessor by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    prev_hash: BlockHash,
    transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(prev_hash: BlockHash, transactions: Vec<Transaction>) -> Self {
        Block {
            prev_hash,
            transactions,
        }
    }

    /// SHA-256 of `prev_hash ++ txid_0 ++ txid_1 ++ ...`, recomputed on every call.
    pub fn hash(&self) -> BlockHash {
        let mut data = Vec::with_capacity(32 * (self.transactions.len() + 1));
        data.extend_from_slice(self.prev_hash.as_bytes());
        for tx in &self.transactions {
            data.extend_from_slice(tx.id().as_bytes());
        }
        BlockHash(sha256(&data))
    }

    pub fn previous_hash(&self) -> BlockHash {
        self.prev_hash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn coinbase_count(&self) -> usize {
        self.transactions.iter().filter(|tx| tx.is_coinbase()).count()
    }
}

#[derive(Debug, Clone)]
struct StoredBlock {
    block: Block,
    /// Number of blocks from the sentinel up to and including this one.
    height: u64,
}

/// Append-only store of every block the node has validated, on any branch.
///
/// Also indexes every transaction those blocks carry, so rolling a block back
/// can restore the outputs it consumed.
#[derive(Debug, Clone)]
pub struct BlockStore {
    sentinel: BlockHash,
    blocks: HashMap<BlockHash, StoredBlock>,
    transactions: HashMap<TxId, Transaction>,
}

impl BlockStore {
    pub fn new(sentinel: BlockHash) -> Self {
        BlockStore {
            sentinel,
            blocks: HashMap::new(),
            transactions: HashMap::new(),
        }
    }

    pub fn sentinel(&self) -> BlockHash {
        self.sentinel
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    /// True for the sentinel and for any stored block.
    pub fn is_known(&self, hash: &BlockHash) -> bool {
        *hash == self.sentinel || self.contains(hash)
    }

    pub fn get(&self, hash: &BlockHash) -> Result<&Block, ChainError> {
        self.blocks
            .get(hash)
            .map(|stored| &stored.block)
            .ok_or_else(|| ChainError::NotFound(format!("Block {} not in store", hash.short())))
    }

    /// Chain length from genesis. The sentinel has length zero.
    pub fn height(&self, hash: &BlockHash) -> Option<u64> {
        if *hash == self.sentinel {
            return Some(0);
        }
        self.blocks.get(hash).map(|stored| stored.height)
    }

    pub fn transaction(&self, id: &TxId) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    #[cfg(test)]
    pub(crate) fn transactions_mut_for_test(&mut self) -> &mut HashMap<TxId, Transaction> {
        &mut self.transactions
    }

    /// Records a block whose predecessor is already known. Re-inserting a
    /// stored block is a no-op.
    pub fn insert(&mut self, block: Block) -> Result<BlockHash, ChainError> {
        let hash = block.hash();
        if self.contains(&hash) {
            return Ok(hash);
        }

        let parent_height = self.height(&block.previous_hash()).ok_or_else(|| {
            ChainError::NotFound(format!(
                "Parent {} of block {} not in store",
                block.previous_hash().short(),
                hash.short()
            ))
        })?;

        for tx in block.transactions() {
            self.transactions.entry(tx.id()).or_insert_with(|| tx.clone());
        }
        self.blocks.insert(
            hash,
            StoredBlock {
                block,
                height: parent_height + 1,
            },
        );
        Ok(hash)
    }

    /// Walks from `tip` towards genesis, yielding each stored block.
    pub fn ancestors(&self, tip: BlockHash) -> Ancestors<'_> {
        Ancestors {
            current: tip,
            store: self,
        }
    }

    /// Hashes strictly after `ancestor` up to and including `tip`, oldest first.
    pub fn path_from(&self, ancestor: BlockHash, tip: BlockHash) -> Result<Vec<BlockHash>, ChainError> {
        let mut path = Vec::new();
        let mut current = tip;
        while current != ancestor {
            if current == self.sentinel {
                return Err(ChainError::NotFound(format!(
                    "Block {} is not an ancestor of {}",
                    ancestor.short(),
                    tip.short()
                )));
            }
            let block = self.get(&current)?;
            path.push(current);
            current = block.previous_hash();
        }
        path.reverse();
        Ok(path)
    }
}

pub struct Ancestors<'a> {
    current: BlockHash,
    store: &'a BlockStore,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = (BlockHash, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current;
        let block = self.store.blocks.get(&hash).map(|stored| &stored.block)?;
        self.current = block.previous_hash();
        Some((hash, block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{PublicKey, Signature};

    fn coinbase(tag: u8) -> Transaction {
        Transaction::new(
            PublicKey::from_bytes(vec![2u8; 33]),
            None,
            Signature::from_bytes(vec![tag; 64]),
        )
    }

    #[test]
    fn test_block_hash_covers_order_and_parent() {
        let a = coinbase(1);
        let b = coinbase(2);
        let block = Block::new(BlockHash::default(), vec![a.clone(), b.clone()]);
        let swapped = Block::new(BlockHash::default(), vec![b.clone(), a.clone()]);
        let reparented = Block::new(BlockHash([1u8; 32]), vec![a, b]);

        assert_ne!(block.hash(), swapped.hash());
        assert_ne!(block.hash(), reparented.hash());
        assert_eq!(block.hash(), block.clone().hash());
    }

    #[test]
    fn test_store_heights_and_paths() {
        let mut store = BlockStore::new(BlockHash::default());
        let b1 = Block::new(store.sentinel(), vec![coinbase(1)]);
        let h1 = store.insert(b1).unwrap();
        let b2 = Block::new(h1, vec![coinbase(2)]);
        let h2 = store.insert(b2).unwrap();

        assert_eq!(store.height(&store.sentinel()), Some(0));
        assert_eq!(store.height(&h1), Some(1));
        assert_eq!(store.height(&h2), Some(2));
        assert_eq!(store.path_from(store.sentinel(), h2).unwrap(), vec![h1, h2]);
        assert_eq!(store.path_from(h1, h2).unwrap(), vec![h2]);
        assert!(store.path_from(h2, h1).is_err());

        let walked: Vec<_> = store.ancestors(h2).map(|(h, _)| h).collect();
        assert_eq!(walked, vec![h2, h1]);
        assert!(store.transaction(&coinbase(2).id()).is_some());
    }

    #[test]
    fn test_store_requires_known_parent() {
        let mut store = BlockStore::new(BlockHash::default());
        let orphan = Block::new(BlockHash([9u8; 32]), vec![coinbase(1)]);
        assert!(matches!(store.insert(orphan), Err(ChainError::NotFound(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_unknown_block_is_not_found() {
        let store = BlockStore::new(BlockHash::default());
        assert!(matches!(
            store.get(&BlockHash([3u8; 32])),
            Err(ChainError::NotFound(_))
        ));
    }
}

use crate::blockchain::BlockStore;
use crate::crypto::BlockHash;
use crate::error::ChainError;
use std::collections::HashSet;

/// Criteria for choosing between two chain tips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainCriteria {
    pub tip: BlockHash,
    /// Blocks from genesis up to and including `tip`.
    pub length: u64,
}

impl ChainCriteria {
    pub fn from_store(store: &BlockStore, tip: BlockHash) -> Result<Self, ChainError> {
        let length = store
            .height(&tip)
            .ok_or_else(|| ChainError::NotFound(format!("Tip {} not in store", tip.short())))?;
        Ok(Self { tip, length })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkChoice {
    KeepCurrent,
    Switch,
}

/// Longest chain from genesis wins. Ties stay with the incumbent.
pub fn choose_fork(incumbent: &ChainCriteria, candidate: &ChainCriteria) -> ForkChoice {
    if candidate.length > incumbent.length {
        ForkChoice::Switch
    } else {
        ForkChoice::KeepCurrent
    }
}

/// Lowest common ancestor of two stored tips.
///
/// Walks both chains back one block at a time, alternating, until one walk
/// reaches a hash the other has visited. The sentinel is shared by every chain.
pub fn find_split_point(
    store: &BlockStore,
    a: BlockHash,
    b: BlockHash,
) -> Result<BlockHash, ChainError> {
    let mut seen_a = HashSet::new();
    let mut seen_b = HashSet::new();
    let mut cursor_a = Some(a);
    let mut cursor_b = Some(b);

    while cursor_a.is_some() || cursor_b.is_some() {
        if let Some(hash) = cursor_a {
            if seen_b.contains(&hash) {
                return Ok(hash);
            }
            seen_a.insert(hash);
            cursor_a = parent_of(store, hash)?;
        }
        if let Some(hash) = cursor_b {
            if seen_a.contains(&hash) {
                return Ok(hash);
            }
            seen_b.insert(hash);
            cursor_b = parent_of(store, hash)?;
        }
    }

    Err(ChainError::NotFound(format!(
        "No common ancestor for {} and {}",
        a.short(),
        b.short()
    )))
}

fn parent_of(store: &BlockStore, hash: BlockHash) -> Result<Option<BlockHash>, ChainError> {
    if hash == store.sentinel() {
        return Ok(None);
    }
    Ok(Some(store.get(&hash)?.previous_hash()))
}

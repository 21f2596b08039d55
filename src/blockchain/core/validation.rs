use crate::crypto::{BlockHash, SignatureScheme};
use crate::error::ChainError;
use std::collections::{HashMap, HashSet};

use super::chain::Block;
use super::state::UtxoSet;

pub fn validate_no_double_spend(block: &Block) -> Result<(), ChainError> {
    let mut seen_inputs = HashMap::new();
    for tx in block.transactions() {
        if let Some(input) = tx.input() {
            if let Some(conflicting) = seen_inputs.insert(*input, tx.id()) {
                return Err(ChainError::DoubleSpendDetected(format!(
                    "UTXO {} is spent by both {} and {}",
                    input.short(),
                    conflicting.short(),
                    tx.id().short()
                )));
            }
        }
    }
    Ok(())
}

/// Validates `block` as the successor of the chain whose unspent outputs are
/// `utxo`. Transactions are checked against the state before the block, so a
/// block may not spend an output it creates itself.
pub fn validate_block(
    block: &Block,
    claimed_hash: &BlockHash,
    utxo: &UtxoSet,
    block_capacity: usize,
    scheme: &dyn SignatureScheme,
) -> Result<(), ChainError> {
    let hash = block.hash();
    if hash != *claimed_hash {
        return Err(ChainError::InvalidBlock(format!(
            "Hash mismatch. Claimed {}, computed {}",
            claimed_hash.short(),
            hash.short()
        )));
    }

    if block.transactions().len() > block_capacity {
        return Err(ChainError::InvalidBlock(format!(
            "Block {} carries {} transactions (max: {})",
            hash.short(),
            block.transactions().len(),
            block_capacity
        )));
    }

    let coinbase_count = block.coinbase_count();
    if coinbase_count != 1 {
        return Err(ChainError::InvalidBlock(format!(
            "Block {} has {} coinbase records, expected exactly one",
            hash.short(),
            coinbase_count
        )));
    }

    let mut ids = HashSet::new();
    for tx in block.transactions() {
        let id = tx.id();
        if !ids.insert(id) {
            return Err(ChainError::InvalidBlock(format!(
                "Transaction {} appears twice in block {}",
                id.short(),
                hash.short()
            )));
        }
        if utxo.contains(&id) {
            return Err(ChainError::InvalidBlock(format!(
                "Transaction {} is already an unspent output",
                id.short()
            )));
        }
    }

    validate_no_double_spend(block)?;

    for tx in block.transactions().iter().filter(|tx| !tx.is_coinbase()) {
        tx.validate(utxo, scheme).map_err(|e| {
            ChainError::InvalidBlock(format!("Transaction {} rejected: {}", tx.id().short(), e))
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, PublicKey, Secp256k1Scheme};
    use crate::transaction::Transaction;

    const CAPACITY: usize = 4;

    fn keypair() -> KeyPair {
        Secp256k1Scheme.generate_keypair().unwrap()
    }

    fn spend(owner: &KeyPair, coin: &Transaction, target: &PublicKey) -> Transaction {
        let message = Transaction::signable_message(&coin.id(), target);
        let signature = Secp256k1Scheme.sign(&message, &owner.private_key).unwrap();
        Transaction::new(target.clone(), Some(coin.id()), signature)
    }

    fn funded(owner: &KeyPair) -> (UtxoSet, Transaction) {
        let coin = Transaction::coinbase(owner.public_key.clone(), 64);
        let mut utxo = UtxoSet::new();
        utxo.insert(coin.clone());
        (utxo, coin)
    }

    fn check(block: &Block, utxo: &UtxoSet) -> Result<(), ChainError> {
        validate_block(block, &block.hash(), utxo, CAPACITY, &Secp256k1Scheme)
    }

    #[test]
    fn test_valid_block() {
        let alice = keypair();
        let (utxo, coin) = funded(&alice);
        let block = Block::new(
            BlockHash::default(),
            vec![
                spend(&alice, &coin, &alice.public_key),
                Transaction::coinbase(alice.public_key.clone(), 64),
            ],
        );
        assert!(check(&block, &utxo).is_ok());
    }

    #[test]
    fn test_hash_mismatch() {
        let alice = keypair();
        let block = Block::new(
            BlockHash::default(),
            vec![Transaction::coinbase(alice.public_key, 64)],
        );
        let err = validate_block(&block, &BlockHash([1u8; 32]), &UtxoSet::new(), CAPACITY, &Secp256k1Scheme);
        assert!(matches!(err, Err(ChainError::InvalidBlock(_))));
    }

    #[test]
    fn test_coinbase_count_must_be_one() {
        let alice = keypair();
        let none = Block::new(BlockHash::default(), vec![]);
        let two = Block::new(
            BlockHash::default(),
            vec![
                Transaction::coinbase(alice.public_key.clone(), 64),
                Transaction::coinbase(alice.public_key, 64),
            ],
        );
        assert!(check(&none, &UtxoSet::new()).is_err());
        assert!(check(&two, &UtxoSet::new()).is_err());
    }

    #[test]
    fn test_capacity_enforced() {
        let alice = keypair();
        let mut utxo = UtxoSet::new();
        let mut txs = Vec::new();
        for _ in 0..CAPACITY {
            let coin = Transaction::coinbase(alice.public_key.clone(), 64);
            utxo.insert(coin.clone());
            txs.push(spend(&alice, &coin, &alice.public_key));
        }
        txs.push(Transaction::coinbase(alice.public_key.clone(), 64));
        let block = Block::new(BlockHash::default(), txs);

        assert!(check(&block, &utxo).unwrap_err().to_string().contains("max"));
    }

    #[test]
    fn test_double_spend_in_block() {
        let alice = keypair();
        let bob = keypair();
        let (utxo, coin) = funded(&alice);
        let block = Block::new(
            BlockHash::default(),
            vec![
                spend(&alice, &coin, &alice.public_key),
                spend(&alice, &coin, &bob.public_key),
                Transaction::coinbase(alice.public_key.clone(), 64),
            ],
        );
        assert!(matches!(
            check(&block, &utxo),
            Err(ChainError::DoubleSpendDetected(_))
        ));
    }

    #[test]
    fn test_duplicate_transaction_in_block() {
        let alice = keypair();
        let (utxo, coin) = funded(&alice);
        let tx = spend(&alice, &coin, &alice.public_key);
        let block = Block::new(
            BlockHash::default(),
            vec![tx.clone(), tx, Transaction::coinbase(alice.public_key.clone(), 64)],
        );
        assert!(check(&block, &utxo).unwrap_err().to_string().contains("twice"));
    }

    #[test]
    fn test_unknown_input_and_bad_signature() {
        let alice = keypair();
        let mallory = keypair();
        let (utxo, coin) = funded(&alice);

        let stranger = Transaction::coinbase(alice.public_key.clone(), 64);
        let unknown = Block::new(
            BlockHash::default(),
            vec![
                spend(&alice, &stranger, &alice.public_key),
                Transaction::coinbase(alice.public_key.clone(), 64),
            ],
        );
        assert!(check(&unknown, &utxo).is_err());

        let forged = Block::new(
            BlockHash::default(),
            vec![
                spend(&mallory, &coin, &mallory.public_key),
                Transaction::coinbase(mallory.public_key.clone(), 64),
            ],
        );
        assert!(check(&forged, &utxo).is_err());
    }

    #[test]
    fn test_replayed_coinbase_rejected() {
        let alice = keypair();
        let (utxo, coin) = funded(&alice);
        let block = Block::new(BlockHash::default(), vec![coin]);
        assert!(check(&block, &utxo).is_err());
    }
}

//! Contextual validation for transactions, separated from the record itself
use crate::blockchain::UtxoSet;
use crate::crypto::SignatureScheme;
use crate::error::ChainError;
use crate::transaction::types::Transaction;

impl Transaction {
    /// Checks that `spent` is the output this transaction consumes and that the
    /// signature verifies against the key that owns it.
    pub fn verify_spend(
        &self,
        spent: &Transaction,
        scheme: &dyn SignatureScheme,
    ) -> Result<(), ChainError> {
        let input = self.input().ok_or_else(|| {
            ChainError::InvalidTransaction("Coinbase record has no input to spend".to_string())
        })?;

        if *input != spent.id() {
            return Err(ChainError::InvalidTransaction(format!(
                "Input {} does not match spent output {}",
                input.short(),
                spent.id().short()
            )));
        }

        let message = Transaction::signable_message(input, self.output());
        if !scheme.verify(&message, self.signature(), spent.output()) {
            return Err(ChainError::InvalidTransaction(format!(
                "Signature of {} does not verify against the owner of {}",
                self.id().short(),
                input.short()
            )));
        }

        Ok(())
    }

    /// Full validation of a non-coinbase transaction against a UTXO state.
    pub fn validate(&self, utxo: &UtxoSet, scheme: &dyn SignatureScheme) -> Result<(), ChainError> {
        let input = self.input().ok_or_else(|| {
            ChainError::InvalidTransaction("Coinbase records are only created by miners".to_string())
        })?;

        let spent = utxo.get(input).ok_or_else(|| {
            ChainError::NotFound(format!("Input {} not found in UTXO set", input.short()))
        })?;

        self.verify_spend(spent, scheme)
    }
}

//! Transaction record for Coinmesh
use crate::crypto::{random_nonce, sha256, PublicKey, Signature, TxId};
use std::hash::{Hash, Hasher};

/// A one-coin transfer, or a coin creation when `input` is `None`.
///
/// The identifier is never stored; [`Transaction::id`] hashes the fields on every
/// call, and equality follows the identifier.
#[derive(Debug, Clone)]
pub struct Transaction {
    output: PublicKey,
    input: Option<TxId>,
    signature: Signature,
}

impl Transaction {
    pub fn new(output: PublicKey, input: Option<TxId>, signature: Signature) -> Self {
        Transaction {
            output,
            input,
            signature,
        }
    }

    /// Reward record paying one coin to `beneficiary`, with a random nonce of
    /// `nonce_len` bytes in place of a signature.
    pub fn coinbase(beneficiary: PublicKey, nonce_len: usize) -> Self {
        Transaction::new(beneficiary, None, random_nonce(nonce_len))
    }

    pub fn output(&self) -> &PublicKey {
        &self.output
    }

    pub fn input(&self) -> Option<&TxId> {
        self.input.as_ref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn is_coinbase(&self) -> bool {
        self.input.is_none()
    }

    /// SHA-256 of `output ++ input ++ signature`, with an absent input contributing no bytes.
    pub fn id(&self) -> TxId {
        let mut data = Vec::with_capacity(
            self.output.as_bytes().len() + 32 + self.signature.as_bytes().len(),
        );
        data.extend_from_slice(self.output.as_bytes());
        if let Some(input) = &self.input {
            data.extend_from_slice(input.as_bytes());
        }
        data.extend_from_slice(self.signature.as_bytes());
        TxId(sha256(&data))
    }

    /// Bytes the owner of `input` signs to move it to `output`.
    pub fn signable_message(input: &TxId, output: &PublicKey) -> Vec<u8> {
        let mut message = Vec::with_capacity(32 + output.as_bytes().len());
        message.extend_from_slice(input.as_bytes());
        message.extend_from_slice(output.as_bytes());
        message
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

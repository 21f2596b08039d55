//! Cryptographic primitives for Coinmesh
//!
//! Signing and verification go through the [`SignatureScheme`] capability so the
//! ledger never touches a concrete curve. Identifiers of transactions and blocks
//! are SHA-256 digests produced by [`sha256`].

use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa, All, Message, Secp256k1, SecretKey,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

pub type Sha256Hash = [u8; 32];

/// SHA-256 over arbitrary bytes. Used for every identifier in the ledger.
pub fn sha256(data: &[u8]) -> Sha256Hash {
    Sha256::digest(data).into()
}

macro_rules! hash_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub Sha256Hash);

        impl $name {
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(hex_str: &str) -> Result<Self, ChainError> {
                let bytes = hex::decode(hex_str)
                    .map_err(|e| ChainError::CryptoError(format!("Invalid hex digest: {}", e)))?;
                let digest: Sha256Hash = bytes.try_into().map_err(|b: Vec<u8>| {
                    ChainError::CryptoError(format!("Digest must be 32 bytes, got {}", b.len()))
                })?;
                Ok(Self(digest))
            }

            /// Short prefix for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $name::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hash_newtype!(
    /// Identifier of a transaction record, always derived from its contents.
    TxId
);
hash_newtype!(
    /// Identifier of a block, always derived from its predecessor and transaction ids.
    BlockHash
);

/// Serialized public key. Doubles as the address coins are sent to.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = &self.0[..self.0.len().min(4)];
        write!(f, "PublicKey({})", hex::encode(prefix))
    }
}

/// Signature bytes. Coinbase records carry a random nonce here instead.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

/// Secret key material. Never printed.
#[derive(Clone)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

/// Signing capability consumed by the ledger.
pub trait SignatureScheme: Send + Sync {
    fn generate_keypair(&self) -> Result<KeyPair, ChainError>;

    fn sign(&self, message: &[u8], key: &PrivateKey) -> Result<Signature, ChainError>;

    /// Returns false on any malformed key or signature instead of erroring.
    fn verify(&self, message: &[u8], signature: &Signature, key: &PublicKey) -> bool;

    fn hash(&self, data: &[u8]) -> Sha256Hash {
        sha256(data)
    }
}

/// ECDSA over secp256k1 with SHA-256 message digests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Scheme;

impl Secp256k1Scheme {
    fn message(data: &[u8]) -> Result<Message, ChainError> {
        let digest = sha256(data);
        Message::from_digest_slice(&digest)
            .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))
    }
}

impl SignatureScheme for Secp256k1Scheme {
    fn generate_keypair(&self) -> Result<KeyPair, ChainError> {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = secp256k1::PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);

        Ok(KeyPair {
            private_key: PrivateKey(secret_key.secret_bytes().to_vec()),
            public_key: PublicKey(public_key.serialize().to_vec()),
        })
    }

    fn sign(&self, message: &[u8], key: &PrivateKey) -> Result<Signature, ChainError> {
        let secret_key = SecretKey::from_slice(key.as_bytes()).map_err(|e| {
            if key.as_bytes().len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    key.as_bytes().len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        let message = Self::message(message)?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &secret_key);
        Ok(Signature(signature.serialize_compact().to_vec()))
    }

    fn verify(&self, message: &[u8], signature: &Signature, key: &PublicKey) -> bool {
        if key.as_bytes().len() != PUBLIC_KEY_SIZE || signature.len() != COMPACT_SIGNATURE_SIZE {
            return false;
        }

        let Ok(public_key) = secp256k1::PublicKey::from_slice(key.as_bytes()) else {
            return false;
        };
        let Ok(signature) = ecdsa::Signature::from_compact(signature.as_bytes()) else {
            return false;
        };
        let Ok(message) = Self::message(message) else {
            return false;
        };

        SECP256K1_CONTEXT
            .verify_ecdsa(&message, &signature, &public_key)
            .is_ok()
    }
}

/// Fixed-length random bytes for coinbase records.
pub fn random_nonce(len: usize) -> Signature {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    Signature(bytes)
}

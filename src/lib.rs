//! Coinmesh - a single-coin UTXO ledger simulated across gossiping peers
//!
//! # Architecture
//!
//! ## Core Ledger
//! - [`transaction`] - One-coin transfer and coinbase records
//! - [`blockchain`] - Blocks, the append-only block store, UTXO state and block validation
//! - [`mempool`] - Pending transactions, FIFO with input conflict index
//!
//! ## Consensus & Sync
//! - [`consensus`] - Longest-chain fork choice and split-point search
//! - [`node`] - Ledger node: admission, mining, accessors
//! - [`sync`] - Block notifications and chain reorganization
//!
//! ## Cryptography
//! - [`crypto`] - Identifiers and the signature capability (secp256k1)
//!
//! ## Networking
//! - [`network`] - Peer registry and breadth-first gossip
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`logging`] - Tracing setup

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus & Sync
// ============================================================================
pub mod consensus;
pub mod node;
pub mod sync;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Networking
// ============================================================================
pub mod network;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod logging;

pub use blockchain::{Block, BlockStore, UtxoSet};
pub use config::LedgerConfig;
pub use crypto::{BlockHash, PublicKey, Signature, TxId};
pub use error::{ChainError, Result};
pub use network::{BlockSource, Network, NodeId};
pub use node::LedgerNode;
pub use sync::BlockOutcome;
pub use transaction::Transaction;

// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// block storage, UTXO state transitions and block validation.

pub mod core;
pub use self::core::*;

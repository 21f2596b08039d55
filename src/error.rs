//! Error types for Coinmesh

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// A requested block or transaction is absent. Expected during sync walks.
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Double spend detected: {0}")]
    DoubleSpendDetected(String),
    /// Internal inconsistency while rolling the chain back or forward.
    /// Never caused by peer input; state is restored before this is reported.
    #[error("Reorganization failure: {0}")]
    ReorgFailure(String),
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl ChainError {
    /// True for errors that indicate a bug in local bookkeeping rather than
    /// bad input from a caller or peer.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::ReorgFailure(_))
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;

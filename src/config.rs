//! Configuration management for Coinmesh

use crate::crypto::BlockHash;
use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Length of the random nonce carried in the signature slot of coinbase records.
pub const COINBASE_NONCE_LEN: usize = 64;

/// Tunables handed to every node at construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerConfig {
    /// Maximum transactions per block, coinbase included.
    #[serde(default = "default_block_capacity")]
    pub block_capacity: usize,
    /// Reserved predecessor hash of the first block.
    #[serde(default)]
    pub genesis_sentinel: BlockHash,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            block_capacity: default_block_capacity(),
            genesis_sentinel: BlockHash::default(),
        }
    }
}

impl LedgerConfig {
    pub fn with_block_capacity(mut self, block_capacity: usize) -> Self {
        self.block_capacity = block_capacity;
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: LedgerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_capacity == 0 {
            return Err(ChainError::ConfigError(
                "block_capacity must leave room for the coinbase record".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load the config at `path`, falling back to defaults when no path is given
/// or the file is missing or empty.
pub fn load_config(path: Option<&Path>) -> Result<LedgerConfig> {
    let config_str = match path {
        Some(p) if p.exists() => fs::read_to_string(p)?,
        _ => String::new(),
    };

    if config_str.trim().is_empty() {
        return Ok(LedgerConfig::default());
    }
    LedgerConfig::from_toml_str(&config_str)
}

fn default_block_capacity() -> usize {
    10
}

//! TOML configuration for the chain core.
//!
//! Config file is loaded from an explicit path; every section falls back to
//! its `Default` when absent, so an empty file (or no file) yields a working
//! in-process configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse failed: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub chain: ChainSection,
    #[serde(default)]
    pub genesis: GenesisSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    /// Path of the block database. Ignored when `in_mem_test` is set.
    pub chain_db_path: String,
    /// Path of the state trie database. Empty keeps account state in memory
    /// only (the block log itself can still persist).
    pub trie_db_path: String,
    /// Run the whole node against the in-memory store.
    pub in_mem_test: bool,
    /// Default block producer identity, consumed by the consensus layer
    /// when it asks for a mint.
    pub producer_addr: String,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            chain_db_path: "./data/chain.db".into(),
            trie_db_path: "./data/trie.db".into(),
            in_mem_test: false,
            producer_addr: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisSection {
    pub total_supply: u64,
    pub block_reward: u64,
    /// Creator account holding the initial supply. Derived from a fixed
    /// seed when empty.
    pub creator_addr: String,
    /// Size cap of the ranked candidate set.
    pub candidate_set_size: usize,
}

impl Default for GenesisSection {
    fn default() -> Self {
        Self {
            total_supply: 10_000_000_000,
            block_reward: 0,
            creator_addr: String::new(),
            candidate_set_size: 2,
        }
    }
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Load from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.genesis.total_supply, 10_000_000_000);
        assert_eq!(cfg.genesis.block_reward, 0);
        assert_eq!(cfg.genesis.candidate_set_size, 2);
        assert!(!cfg.chain.in_mem_test);
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let cfg: NodeConfig = toml::from_str(
            r#"
            [chain]
            in_mem_test = true

            [genesis]
            block_reward = 5
            "#,
        )
        .unwrap();
        assert!(cfg.chain.in_mem_test);
        assert_eq!(cfg.chain.chain_db_path, "./data/chain.db");
        assert_eq!(cfg.genesis.block_reward, 5);
        assert_eq!(cfg.genesis.total_supply, 10_000_000_000);
    }

    #[test]
    fn empty_toml_parses() {
        let cfg: NodeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.genesis.candidate_set_size, 2);
    }
}

//! Node configuration
//!
//! A JSON config file holds everything a node needs to start: ports,
//! paths to key material and the genesis block, peers to dial and whether
//! to mine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed config: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// P2P listen port
    pub listen_port: u16,
    /// HTTP status endpoint port
    pub api_port: u16,
    /// Directory for persisted blocks
    pub data_dir: PathBuf,
    /// Node key pair file
    pub key_file: PathBuf,
    /// Serialized genesis block
    pub genesis_file: PathBuf,
    /// Peers to dial on startup
    pub peers: Vec<String>,
    /// Whether to run the mining loop
    pub mine: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 9333,
            api_port: 9080,
            data_dir: PathBuf::from(".tinychain"),
            key_file: PathBuf::from("key.json"),
            genesis_file: PathBuf::from("genesis.bin"),
            peers: Vec::new(),
            mine: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.peers.push("10.0.0.1:9333".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.listen_port, config.listen_port);
        assert_eq!(loaded.peers, config.peers);
        assert!(loaded.mine);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::load(Path::new("/nonexistent/config.json")).is_err());
    }
}

//! Proof-of-work mining

pub mod miner;

pub use miner::{mine_genesis, Miner, MiningStats, BLOCK_REWARD, GENESIS_SUPPLY};

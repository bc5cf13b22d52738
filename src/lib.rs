//! tinychain: a minimal proof-of-work UTXO blockchain node
//!
//! The pieces fit together like this: the [`chain`] executor validates
//! blocks and applies them to the UTXO set under a cumulative-difficulty
//! tip rule; the [`net`] layer gossips blocks and transactions between
//! peers through an inventory protocol; the [`mining`] loop searches for
//! proof-of-work on top of the current tip and restarts whenever the tip
//! moves; and [`wallet`] builds the signed transactions that feed the
//! whole cycle.

pub mod api;
pub mod chain;
pub mod config;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod net;
pub mod storage;
pub mod wallet;

pub use chain::{BlockOutcome, ChainError, Executor, TipSummary};
pub use config::Config;
pub use core::{Block, Transaction};
pub use crypto::KeyPair;
pub use mining::{mine_genesis, Miner};
pub use net::{Node, NodeConfig};
pub use storage::Storage;
pub use wallet::{HierarchicalWallet, Wallet};

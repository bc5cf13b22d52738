//! Wallets: UTXO selection, spend construction and HD key derivation

pub mod wallet;

pub use wallet::{derive_child, HierarchicalWallet, Wallet, WalletError};

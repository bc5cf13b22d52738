//! Wallet and deterministic key derivation
//!
//! A wallet holds one key pair. Spends select owned UTXOs in the set's
//! deterministic order, sign every input with one shared signature over
//! the transaction's signing hash, and return change to the owner. The
//! hierarchical wallet derives an ordered chain of child keys from a
//! root key and a seed.

use crate::core::transaction::{InEntry, OutEntry, Outpoint, Transaction};
use crate::crypto::{double_sha256, KeyError, KeyPair};
use std::collections::BTreeMap;
use thiserror::Error;

/// Wallet errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// A single-key wallet
pub struct Wallet {
    pub key_pair: KeyPair,
}

impl Wallet {
    pub fn new(key_pair: KeyPair) -> Self {
        Self { key_pair }
    }

    pub fn address(&self) -> String {
        self.key_pair.address()
    }

    /// Total value of owned outputs in the snapshot
    pub fn balance(&self, utxos: &BTreeMap<Outpoint, OutEntry>) -> u64 {
        let address = self.address();
        utxos
            .values()
            .filter(|out| out.recipient == address)
            .map(|out| out.amount)
            .sum()
    }

    /// Build and sign a transaction sending `amount` to `recipient`.
    /// Owned UTXOs are consumed in the snapshot's order until the amount
    /// is covered; any excess comes back as a change output. Fails with
    /// `InsufficientFunds` before any transaction is emitted.
    pub fn send_to(
        &self,
        utxos: &BTreeMap<Outpoint, OutEntry>,
        recipient: &str,
        amount: u64,
    ) -> Result<Transaction, WalletError> {
        let address = self.address();

        let mut selected: Vec<Outpoint> = Vec::new();
        let mut gathered: u64 = 0;
        for (outpoint, out) in utxos {
            if out.recipient != address {
                continue;
            }
            selected.push(outpoint.clone());
            gathered = gathered.saturating_add(out.amount);
            if gathered >= amount {
                break;
            }
        }

        if gathered < amount {
            return Err(WalletError::InsufficientFunds {
                have: gathered,
                need: amount,
            });
        }

        let in_entries = selected
            .iter()
            .map(|op| InEntry::new(&op.transaction_id, op.out_index))
            .collect();
        let mut out_entries = vec![OutEntry {
            recipient: recipient.to_string(),
            amount,
        }];
        if gathered > amount {
            out_entries.push(OutEntry {
                recipient: address,
                amount: gathered - amount,
            });
        }

        let mut tx = Transaction::new(in_entries, out_entries);

        // One key, one signature, shared by every input
        let signature = hex::encode(self.key_pair.sign(&tx.signing_hash())?);
        let public_key = self.key_pair.public_key_hex();
        for entry in &mut tx.in_entries {
            entry.public_key = public_key.clone();
            entry.signature = signature.clone();
        }

        Ok(tx.sealed())
    }
}

/// Derive the next key in a chain: the child private scalar is the double
/// hash of `parentPublicKey || seed || index_le`.
pub fn derive_child(parent: &KeyPair, index: u32, seed: &[u8]) -> Result<KeyPair, KeyError> {
    let mut material = parent.public_key.serialize().to_vec();
    material.extend_from_slice(seed);
    material.extend_from_slice(&index.to_le_bytes());
    KeyPair::from_private_key(&double_sha256(&material))
}

/// An ordered chain of key pairs derived from a root key. The seed is the
/// double hash of the root private key, so the whole hierarchy is
/// recoverable from the root alone.
pub struct HierarchicalWallet {
    seed: [u8; 32],
    keys: Vec<KeyPair>,
}

impl HierarchicalWallet {
    pub fn from_root(root: KeyPair) -> Self {
        let seed = double_sha256(&root.secret_key.secret_bytes());
        Self {
            seed,
            keys: vec![root],
        }
    }

    /// Extend the chain by `n` further derivations, each computed from
    /// its immediate predecessor
    pub fn extend(&mut self, n: usize) -> Result<(), KeyError> {
        for _ in 0..n {
            let index = (self.keys.len() - 1) as u32;
            // keys is never empty; the root is always present
            let parent = match self.keys.last() {
                Some(parent) => parent,
                None => return Err(KeyError::InvalidPrivateKey),
            };
            let child = derive_child(parent, index, &self.seed)?;
            self.keys.push(child);
        }
        Ok(())
    }

    pub fn keys(&self) -> &[KeyPair] {
        &self.keys
    }

    pub fn addresses(&self) -> Vec<String> {
        self.keys.iter().map(|kp| kp.address()).collect()
    }
}

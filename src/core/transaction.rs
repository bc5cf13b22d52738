//! UTXO-style transactions
//!
//! A transaction consumes previous outputs through signed in-entries and
//! creates new outputs. Finality comes from block inclusion; the timestamp
//! is informational only.

use crate::core::codec;
use crate::crypto::{double_sha256, double_sha256_hex, verify_signature, KeyError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a prior output being spent, with the authorizing key and
/// signature (hex-encoded; blank until signed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InEntry {
    pub transaction_id: String,
    pub out_index: u16,
    pub public_key: String,
    pub signature: String,
}

impl InEntry {
    /// An unsigned spend reference
    pub fn new(transaction_id: &str, out_index: u16) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            out_index,
            public_key: String::new(),
            signature: String::new(),
        }
    }

    /// The outpoint this entry spends
    pub fn outpoint(&self) -> Outpoint {
        Outpoint {
            transaction_id: self.transaction_id.clone(),
            out_index: self.out_index,
        }
    }
}

/// A newly created output: recipient address and amount in the smallest unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutEntry {
    pub recipient: String,
    pub amount: u64,
}

/// Key of a spendable output. Ordering is lexicographic by transaction id
/// then index, which fixes the iteration order of the UTXO set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Outpoint {
    pub transaction_id: String,
    pub out_index: u16,
}

impl Outpoint {
    pub fn new(transaction_id: &str, out_index: u16) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            out_index,
        }
    }
}

/// A ledger transaction. `id` is derived from the serialized bytes and is
/// never part of the wire encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(skip)]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub in_entries: Vec<InEntry>,
    pub out_entries: Vec<OutEntry>,
}

impl Transaction {
    /// Create a transaction and derive its id from the encoded bytes
    pub fn new(in_entries: Vec<InEntry>, out_entries: Vec<OutEntry>) -> Self {
        Self {
            id: String::new(),
            timestamp: Utc::now(),
            in_entries,
            out_entries,
        }
        .sealed()
    }

    /// A coinbase-style transaction with no inputs, minting `amount` to
    /// `recipient`. Only valid as the first transaction of a block.
    pub fn coinbase(recipient: &str, amount: u64) -> Self {
        Self::new(
            vec![],
            vec![OutEntry {
                recipient: recipient.to_string(),
                amount,
            }],
        )
    }

    /// Recompute the id from the current contents
    pub fn sealed(mut self) -> Self {
        let bytes = codec::encode_transaction(&self);
        self.id = double_sha256_hex(&bytes);
        self
    }

    /// Whether this transaction mints rather than spends
    pub fn is_coinbase(&self) -> bool {
        self.in_entries.is_empty()
    }

    /// The hash every input signature commits to: the transaction encoded
    /// with all signature fields blanked
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut blanked = self.clone();
        for entry in &mut blanked.in_entries {
            entry.public_key.clear();
            entry.signature.clear();
        }
        double_sha256(&codec::encode_transaction(&blanked))
    }

    /// Verify every in-entry signature over the shared signing hash
    pub fn verify_signatures(&self) -> Result<bool, KeyError> {
        let hash = self.signing_hash();

        for entry in &self.in_entries {
            if entry.public_key.is_empty() || entry.signature.is_empty() {
                return Ok(false);
            }

            let signature =
                hex::decode(&entry.signature).map_err(|_| KeyError::InvalidSignature)?;
            if !verify_signature(&entry.public_key, &hash, &signature)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Sum of created outputs, saturating at `u64::MAX` so an overflowing
    /// output list fails the inputs-cover-outputs check instead of wrapping
    /// around to a small value
    pub fn total_output(&self) -> u64 {
        self.out_entries
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.amount))
    }
}

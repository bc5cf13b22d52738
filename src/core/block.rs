//! Blocks
//!
//! A block commits to its transactions through a merkle root over their
//! ids; the raw payloads travel alongside but are excluded from the header
//! hash so they can be fetched lazily.

use crate::core::codec::{self, CodecError};
use crate::core::transaction::Transaction;
use crate::crypto::{decode_difficulty, double_sha256, meets_difficulty, merkle_root_hex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Previous-hash value of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Default proof-of-work target. Every digest decodes to at least ~2^-31,
/// so this needs a few thousand attempts on average.
pub const DEFAULT_DIFFICULTY: f64 = 1e-6;

/// A block. `id`, `height` and `total_difficulty` are derived: the id is
/// the hash of the consensus header fields, the other two are filled in by
/// the executor when the block is validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(skip)]
    pub id: String,
    pub previous_hash: String,
    pub difficulty: f64,
    pub nonce: u64,
    pub timestamp: DateTime<Utc>,
    pub merkle_root: String,
    pub transaction_ids: Vec<String>,
    pub transactions: Vec<Vec<u8>>,
    #[serde(skip)]
    pub height: u64,
    #[serde(skip)]
    pub total_difficulty: f64,
}

/// The consensus-relevant header fields, hashed to form the block id
#[derive(Serialize)]
struct Header<'a> {
    previous_hash: &'a str,
    difficulty: f64,
    nonce: u64,
    timestamp: &'a DateTime<Utc>,
    merkle_root: &'a str,
}

impl Block {
    /// Assemble an unmined candidate from already-sealed transactions
    pub fn candidate(previous_hash: &str, difficulty: f64, transactions: &[Transaction]) -> Self {
        let transaction_ids: Vec<String> = transactions.iter().map(|tx| tx.id.clone()).collect();
        let payloads = transactions.iter().map(codec::encode_transaction).collect();
        let merkle_root = merkle_root_hex(&transaction_ids);

        Self {
            id: String::new(),
            previous_hash: previous_hash.to_string(),
            difficulty,
            nonce: 0,
            timestamp: Utc::now(),
            merkle_root,
            transaction_ids,
            transactions: payloads,
            height: 0,
            total_difficulty: 0.0,
        }
        .sealed()
    }

    /// Hash of the consensus header fields. Payloads are excluded; the
    /// merkle root is what commits to the transaction list.
    pub fn header_hash(&self) -> [u8; 32] {
        let header = Header {
            previous_hash: &self.previous_hash,
            difficulty: self.difficulty,
            nonce: self.nonce,
            timestamp: &self.timestamp,
            merkle_root: &self.merkle_root,
        };
        // In-memory struct with no non-serializable fields; encoding cannot fail
        let bytes = serde_json::to_vec(&header).unwrap_or_default();
        double_sha256(&bytes)
    }

    /// Recompute the cached id from the header
    pub fn sealed(mut self) -> Self {
        self.id = hex::encode(self.header_hash());
        self
    }

    /// Update the nonce and re-derive the id
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self.sealed()
    }

    /// The difficulty this block's header hash actually decodes to
    pub fn decoded_difficulty(&self) -> f64 {
        decode_difficulty(&self.header_hash())
    }

    /// Check the proof of work against the declared target
    pub fn is_valid_pow(&self) -> bool {
        meets_difficulty(&self.header_hash(), self.difficulty)
    }

    /// Check that the merkle root matches the transaction id list
    pub fn verify_merkle_root(&self) -> bool {
        merkle_root_hex(&self.transaction_ids) == self.merkle_root
    }

    /// Whether this block claims the genesis position
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_PREVIOUS_HASH
    }

    /// Decode the carried payloads. Fails if any payload does not decode
    /// or its derived id disagrees with the parallel id list.
    pub fn parsed_transactions(&self) -> Result<Vec<Transaction>, CodecError> {
        if self.transactions.len() != self.transaction_ids.len() {
            return Err(CodecError::PayloadMismatch);
        }

        let mut parsed = Vec::with_capacity(self.transactions.len());
        for (bytes, expected_id) in self.transactions.iter().zip(&self.transaction_ids) {
            let tx = codec::decode_transaction(bytes)?;
            if tx.id != *expected_id {
                return Err(CodecError::PayloadMismatch);
            }
            parsed.push(tx);
        }
        Ok(parsed)
    }
}

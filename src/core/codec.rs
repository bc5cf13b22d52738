//! The serialize/deserialize boundary for ledger records
//!
//! Records cross the wire and hit disk as opaque byte payloads; the only
//! contract is exact round-tripping. Ids are derived from the bytes (or,
//! for blocks, from the header) at the decode boundary so every stored
//! blob stays content-addressed.

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use thiserror::Error;

/// Decode failures at the codec boundary
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Transaction payloads do not match the id list")]
    PayloadMismatch,
}

/// Serialize a transaction. The id field is skipped, so these bytes are
/// exactly what the transaction id hashes.
pub fn encode_transaction(tx: &Transaction) -> Vec<u8> {
    // Plain data struct; serialization cannot fail
    serde_json::to_vec(tx).unwrap_or_default()
}

/// Deserialize a transaction and derive its id from the payload bytes
pub fn decode_transaction(bytes: &[u8]) -> Result<Transaction, CodecError> {
    let mut tx: Transaction = serde_json::from_slice(bytes)?;
    tx.id = crate::crypto::double_sha256_hex(bytes);
    Ok(tx)
}

/// Serialize a block, payloads included
pub fn encode_block(block: &Block) -> Vec<u8> {
    serde_json::to_vec(block).unwrap_or_default()
}

/// Deserialize a block and derive its id from the consensus header
pub fn decode_block(bytes: &[u8]) -> Result<Block, CodecError> {
    let block: Block = serde_json::from_slice(bytes)?;
    Ok(block.sealed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{DEFAULT_DIFFICULTY, GENESIS_PREVIOUS_HASH};

    #[test]
    fn test_transaction_round_trip() {
        let tx = Transaction::coinbase("addr", 42);
        let bytes = encode_transaction(&tx);
        let decoded = decode_transaction(&bytes).unwrap();

        assert_eq!(decoded, tx);
        assert_eq!(decoded.id, tx.id);
    }

    #[test]
    fn test_block_round_trip_preserves_id() {
        let txs = vec![Transaction::coinbase("addr", 42)];
        let block = Block::candidate(GENESIS_PREVIOUS_HASH, DEFAULT_DIFFICULTY, &txs);

        let bytes = encode_block(&block);
        let decoded = decode_block(&bytes).unwrap();

        assert_eq!(decoded.id, block.id);
        assert_eq!(decoded.transaction_ids, block.transaction_ids);
        assert_eq!(decoded.transactions, block.transactions);
        // f64 difficulty survives the round trip exactly
        assert_eq!(decoded.difficulty.to_bits(), block.difficulty.to_bits());
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(decode_block(b"not a block").is_err());
        assert!(decode_transaction(&[0xFF, 0x00]).is_err());
    }
}

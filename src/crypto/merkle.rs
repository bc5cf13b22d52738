//! Merkle root computation over ordered transaction id lists

use super::hash::sha256;

/// Calculate the merkle root from an ordered list of 32-byte hashes.
/// Odd levels duplicate their last node; an empty list hashes the empty
/// string so every block commits to a defined root.
pub fn merkle_root(hashes: &[[u8; 32]]) -> [u8; 32] {
    if hashes.is_empty() {
        return sha256(b"");
    }

    let mut level: Vec<[u8; 32]> = hashes.to_vec();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));

        for chunk in level.chunks(2) {
            let mut data = [0u8; 64];
            data[..32].copy_from_slice(&chunk[0]);
            data[32..].copy_from_slice(if chunk.len() == 2 { &chunk[1] } else { &chunk[0] });
            next.push(sha256(&data));
        }

        level = next;
    }

    level[0]
}

/// Merkle root over hex-encoded transaction ids, returned as hex
pub fn merkle_root_hex(tx_ids: &[String]) -> String {
    let hashes: Vec<[u8; 32]> = tx_ids
        .iter()
        .filter_map(|id| {
            let bytes = hex::decode(id).ok()?;
            bytes.try_into().ok()
        })
        .collect();
    hex::encode(merkle_root(&hashes))
}

//! Cryptographic hashing and difficulty decoding
//!
//! SHA-256 based hashing used for block ids, transaction ids and HD key
//! derivation, plus the floating-point difficulty decoder that turns a
//! digest into a real-valued proof-of-work score.

use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes double SHA-256 (SHA-256 of SHA-256)
/// Used for block ids, transaction ids and key derivation, where a
/// defensive margin against length-extension/birthday concerns is wanted
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Computes double SHA-256 and returns it as a hex string
pub fn double_sha256_hex(data: &[u8]) -> String {
    hex::encode(double_sha256(data))
}

/// Decode a 256-bit digest into a real-valued difficulty.
///
/// The digest is prefixed with the constant exponent field `0x3F 0xF0` and
/// the leading 8 bytes are read as a big-endian IEEE-754 double `d` in
/// `[1, 1 + 2^-4)`. The difficulty is `2^-35 / (d - 1)`: the smaller the
/// leading bits of the hash, the larger the score. A digest whose leading
/// mantissa bits are all zero decodes to `+inf`.
pub fn decode_difficulty(hash: &[u8; 32]) -> f64 {
    let mut bits = [0u8; 8];
    bits[0] = 0x3F;
    bits[1] = 0xF0;
    bits[2..].copy_from_slice(&hash[..6]);

    let d = f64::from_bits(u64::from_be_bytes(bits));
    2f64.powi(-35) / (d - 1.0)
}

/// Check whether a header hash satisfies a declared difficulty target
pub fn meets_difficulty(hash: &[u8; 32], difficulty: f64) -> bool {
    decode_difficulty(hash) >= difficulty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let hash = sha256(b"hello world");
        assert_eq!(
            hex::encode(hash),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_double_sha256() {
        let data = b"hello world";
        assert_eq!(double_sha256(data), sha256(&sha256(data)));
    }

    #[test]
    fn test_decode_difficulty_zero_hash_is_infinite() {
        let hash = [0u8; 32];
        assert_eq!(decode_difficulty(&hash), f64::INFINITY);
    }

    #[test]
    fn test_decode_difficulty_max_hash() {
        // All-ones digest decodes to the smallest representable score,
        // just above 2^-31.
        let hash = [0xFF; 32];
        let d = decode_difficulty(&hash);
        assert!(d > 2f64.powi(-31));
        assert!(d < 2f64.powi(-30));
    }

    #[test]
    fn test_decode_difficulty_monotonic() {
        // Smaller leading bytes decode to a strictly larger score.
        let mut small = [0u8; 32];
        small[0] = 0x01;
        let mut large = [0u8; 32];
        large[0] = 0x80;
        assert!(decode_difficulty(&small) > decode_difficulty(&large));
    }

    #[test]
    fn test_meets_difficulty_boundary() {
        // The threshold is necessary and sufficient: a hash passes exactly
        // the targets at or below its own decoded score.
        let hash = sha256(b"boundary");
        let score = decode_difficulty(&hash);
        assert!(meets_difficulty(&hash, score));
        assert!(!meets_difficulty(&hash, score * (1.0 + 1e-12)));
    }

    #[test]
    fn test_every_hash_beats_floor_target() {
        // 2^-31 is below the representable minimum, so any digest passes.
        for seed in 0u8..32 {
            let hash = sha256(&[seed]);
            assert!(meets_difficulty(&hash, 2f64.powi(-31)));
        }
    }
}

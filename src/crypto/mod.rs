//! Cryptographic primitives: hashing, difficulty decoding, keys, merkle trees

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{decode_difficulty, double_sha256, double_sha256_hex, meets_difficulty, sha256};
pub use keys::{address_of_hex_key, public_key_to_address, verify_signature, KeyError, KeyPair};
pub use merkle::{merkle_root, merkle_root_hex};

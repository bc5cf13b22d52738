//! ECDSA key management
//!
//! Key pair generation, signing, verification and address derivation on
//! the secp256k1 curve, plus JSON key-file persistence for node identity.

use rand::rngs::OsRng;
use ripemd::{Digest as RipemdDigest, Ripemd160};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::hash::{double_sha256, sha256};

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Key file error: {0}")]
    KeyFileError(#[from] serde_json::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

/// Serializable key-file contents
#[derive(Serialize, Deserialize)]
struct KeyFile {
    private_key: String,
    public_key: String,
    address: String,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Derive a key pair from raw private key bytes
    pub fn from_private_key(bytes: &[u8]) -> Result<Self, KeyError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Address of this key pair (hash of the public key)
    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key)
    }

    /// Sign a 32-byte message hash with the private key
    pub fn sign(&self, message_hash: &[u8; 32]) -> Result<Vec<u8>, KeyError> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(message_hash)?;
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact().to_vec())
    }

    /// Load a key pair from a JSON key file
    pub fn load_from(path: &Path) -> Result<Self, KeyError> {
        let file: KeyFile = serde_json::from_str(&fs::read_to_string(path)?)?;
        let bytes = hex::decode(&file.private_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        Self::from_private_key(&bytes)
    }

    /// Write this key pair to a JSON key file
    pub fn save_to(&self, path: &Path) -> Result<(), KeyError> {
        let file = KeyFile {
            private_key: self.private_key_hex(),
            public_key: self.public_key_hex(),
            address: self.address(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

/// Convert a public key to an address: Base58Check(RIPEMD160(SHA256(pubkey)))
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    let sha256_hash = sha256(&public_key.serialize());

    let mut ripemd = Ripemd160::new();
    ripemd.update(sha256_hash);
    let ripemd_hash = ripemd.finalize();

    // Version byte 0x00, then a 4-byte double-SHA checksum
    let mut address_bytes = vec![0x00];
    address_bytes.extend_from_slice(&ripemd_hash);
    let checksum = double_sha256(&address_bytes);
    address_bytes.extend_from_slice(&checksum[..4]);

    bs58::encode(address_bytes).into_string()
}

/// Derive the address of a hex-encoded compressed public key
pub fn address_of_hex_key(hex_key: &str) -> Result<String, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    let public_key = PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
    Ok(public_key_to_address(&public_key))
}

/// Verify a compact ECDSA signature against a hex-encoded public key
pub fn verify_signature(
    public_key_hex: &str,
    message_hash: &[u8; 32],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let bytes = hex::decode(public_key_hex).map_err(|_| KeyError::InvalidPublicKey)?;
    let public_key = PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;

    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(message_hash)?;
    let sig = secp256k1::ecdsa::Signature::from_compact(signature)
        .map_err(|_| KeyError::InvalidSignature)?;

    Ok(secp.verify_ecdsa(&message, &sig, &public_key).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert!(!kp.private_key_hex().is_empty());
        assert!(!kp.public_key_hex().is_empty());
        assert!(!kp.address().is_empty());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let message_hash = sha256(b"hello, chain");

        let signature = kp.sign(&message_hash).unwrap();
        assert!(verify_signature(&kp.public_key_hex(), &message_hash, &signature).unwrap());

        let other = sha256(b"tampered");
        assert!(!verify_signature(&kp.public_key_hex(), &other, &signature).unwrap());
    }

    #[test]
    fn test_address_matches_public_key() {
        let kp = KeyPair::generate();
        assert_eq!(kp.address(), address_of_hex_key(&kp.public_key_hex()).unwrap());
        // Version byte 0x00 base58-encodes with a leading '1'
        assert!(kp.address().starts_with('1'));
    }

    #[test]
    fn test_key_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");

        let kp = KeyPair::generate();
        kp.save_to(&path).unwrap();

        let loaded = KeyPair::load_from(&path).unwrap();
        assert_eq!(kp.public_key_hex(), loaded.public_key_hex());
        assert_eq!(kp.address(), loaded.address());
    }
}

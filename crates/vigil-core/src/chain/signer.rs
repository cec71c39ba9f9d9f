//! Ed25519 signing key handle used to sign record hashes.

use super::canonical::sha256_hex;
use crate::error::{Result, VigilError};
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;

/// Opaque signing key handle.
///
/// Cloning is cheap enough for the read-mostly sharing pattern (one key loaded
/// per process, shared by every session). `Debug` never prints key material.
#[derive(Clone)]
pub struct LedgerKey {
    inner: ed25519_dalek::SigningKey,
}

impl LedgerKey {
    /// Generates a fresh key from the OS random source.
    pub fn generate() -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Builds a key from a seed slice, rejecting anything but 32 bytes.
    pub fn from_seed_slice(seed: &[u8]) -> Result<Self> {
        let seed: [u8; 32] = seed.try_into().map_err(|_| {
            VigilError::signing(format!("expected 32-byte seed, got {} bytes", seed.len()))
        })?;
        Ok(Self::from_seed(&seed))
    }

    pub fn seed_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.inner.verifying_key()
    }

    /// Short fingerprint of the public key, safe to log.
    pub fn key_id(&self) -> String {
        sha256_hex(self.verifying_key().as_bytes())[..16].to_string()
    }

    /// Signs a record hash (the hex string bytes) and returns hex.
    pub fn sign_hash(&self, hash: &str) -> String {
        hex::encode(self.inner.sign(hash.as_bytes()).to_bytes())
    }
}

impl fmt::Debug for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerKey")
            .field("key_id", &self.key_id())
            .finish()
    }
}

/// Verifies a hex signature over a record hash.
pub fn verify_hash_signature(key: &VerifyingKey, hash: &str, signature_hex: &str) -> bool {
    let Ok(bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    key.verify(hash.as_bytes(), &signature).is_ok()
}

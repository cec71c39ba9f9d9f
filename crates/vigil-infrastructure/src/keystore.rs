//! File keystore for the ledger signing key.
//!
//! The key seed is stored as base64 in `keystore.json`. Machine binding is
//! delegated to a [`KeyCipher`]; the bundled [`PlaintextCipher`] relies on file
//! permissions only.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vigil_core::chain::LedgerKey;
use vigil_core::repository::KeyProvider;

const KEYSTORE_VERSION: u32 = 1;
const KEY_ALGORITHM: &str = "ed25519";

/// Errors that can occur during keystore operations.
#[derive(Debug)]
pub enum KeystoreError {
    /// File I/O error.
    IoError(std::io::Error),
    /// JSON parsing error.
    ParseError(serde_json::Error),
    /// Key material could not be decoded or decrypted.
    InvalidKey(String),
}

impl std::fmt::Display for KeystoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeystoreError::IoError(e) => write!(f, "I/O error: {}", e),
            KeystoreError::ParseError(e) => write!(f, "JSON parse error: {}", e),
            KeystoreError::InvalidKey(e) => write!(f, "Invalid key material: {}", e),
        }
    }
}

impl std::error::Error for KeystoreError {}

impl From<std::io::Error> for KeystoreError {
    fn from(e: std::io::Error) -> Self {
        KeystoreError::IoError(e)
    }
}

impl From<serde_json::Error> for KeystoreError {
    fn from(e: serde_json::Error) -> Self {
        KeystoreError::ParseError(e)
    }
}

/// Wraps key material at rest.
pub trait KeyCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeystoreError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeystoreError>;
}

/// Identity cipher; protection comes from the 0600 file mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextCipher;

impl KeyCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        Ok(ciphertext.to_vec())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFile {
    version: u32,
    algorithm: String,
    created_at: String,
    key: String,
}

/// Keystore backed by a single JSON file.
///
/// Responsibilities:
/// - Load the signing key, creating one on first use
/// - Regenerate and persist a fresh key when the file is corrupt or unreadable
///
/// Old records stay verifiable against the old public key only; regeneration
/// trades that continuity for never blocking session start.
pub struct FileKeystore {
    path: PathBuf,
    cipher: Arc<dyn KeyCipher>,
}

impl FileKeystore {
    pub fn new(path: PathBuf) -> Self {
        Self::with_cipher(path, Arc::new(PlaintextCipher))
    }

    pub fn with_cipher(path: PathBuf, cipher: Arc<dyn KeyCipher>) -> Self {
        Self { path, cipher }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored key.
    ///
    /// - `Ok(Some(key))`: key loaded
    /// - `Ok(None)`: no keystore file yet
    /// - `Err`: file unreadable, malformed, or undecryptable
    pub fn load(&self) -> Result<Option<LedgerKey>, KeystoreError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        let stored: KeystoreFile = serde_json::from_str(&content)?;
        if stored.algorithm != KEY_ALGORITHM {
            return Err(KeystoreError::InvalidKey(format!(
                "unsupported algorithm '{}'",
                stored.algorithm
            )));
        }

        let wrapped = BASE64
            .decode(stored.key.as_bytes())
            .map_err(|e| KeystoreError::InvalidKey(e.to_string()))?;
        let seed = self.cipher.decrypt(&wrapped)?;
        let key = LedgerKey::from_seed_slice(&seed)
            .map_err(|e| KeystoreError::InvalidKey(e.to_string()))?;
        Ok(Some(key))
    }

    /// Persists a key, replacing any existing keystore.
    pub fn save(&self, key: &LedgerKey) -> Result<(), KeystoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let wrapped = self.cipher.encrypt(&key.seed_bytes())?;
        let stored = KeystoreFile {
            version: KEYSTORE_VERSION,
            algorithm: KEY_ALGORITHM.to_string(),
            created_at: Utc::now().to_rfc3339(),
            key: BASE64.encode(wrapped),
        };
        let json = serde_json::to_string_pretty(&stored)?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp_file = fs::File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        // Set file permissions to 600 (user read/write only) on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn generate_and_persist(&self) -> Option<LedgerKey> {
        let key = LedgerKey::generate();
        match self.save(&key) {
            Ok(()) => {
                tracing::info!(
                    key_id = %key.key_id(),
                    path = %self.path.display(),
                    "Created signing key"
                );
                Some(key)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist signing key, continuing unsigned");
                None
            }
        }
    }
}

impl KeyProvider for FileKeystore {
    fn load_or_create(&self) -> Option<LedgerKey> {
        match self.load() {
            Ok(Some(key)) => Some(key),
            Ok(None) => self.generate_and_persist(),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "Keystore unusable, regenerating signing key"
                );
                self.generate_and_persist()
            }
        }
    }
}

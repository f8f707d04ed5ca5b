//! AES-256-GCM wrapping for exported cache snapshots.
//!
//! The SDK core never touches disk; embedding hosts that persist warm
//! caches wrap the exported blob with this cipher. Keys are raw 32-byte
//! secrets supplied by the host or generated fresh.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from snapshot encryption.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Encryption key must be exactly 32 bytes")]
    InvalidKeyLength,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid nonce length for AES-256-GCM payload")]
    InvalidNonce,

    #[error("Cipher operation failed: {0}")]
    Cipher(String),

    #[error("Payload decode failed: {0}")]
    Decode(String),
}

/// Serializable encrypted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub algorithm: String,
}

const ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM snapshot cipher.
pub struct SnapshotCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SnapshotCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCipher").field("key", &"[REDACTED]").finish()
    }
}

impl SnapshotCipher {
    /// Create a cipher from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?;
        Ok(Self { cipher })
    }

    /// Generate a random 32-byte key.
    pub fn generate_key() -> [u8; 32] {
        use aes_gcm::aead::rand_core::RngCore;
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypt bytes into an [`EncryptedBlob`] with a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| EncryptionError::Cipher(e.to_string()))?;
        Ok(EncryptedBlob {
            nonce: nonce.to_vec(),
            ciphertext,
            algorithm: ALGORITHM.to_string(),
        })
    }

    /// Decrypt an [`EncryptedBlob`] back into raw bytes.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>, EncryptionError> {
        if blob.algorithm != ALGORITHM {
            return Err(EncryptionError::UnsupportedAlgorithm(blob.algorithm.clone()));
        }
        if blob.nonce.len() != 12 {
            return Err(EncryptionError::InvalidNonce);
        }
        let nonce = Nonce::from_slice(&blob.nonce);
        self.cipher
            .decrypt(nonce, blob.ciphertext.as_ref())
            .map_err(|e| EncryptionError::Cipher(e.to_string()))
    }

    /// Encrypt bytes and encode the payload as a base64 string.
    pub fn encrypt_to_string(&self, plaintext: &[u8]) -> Result<String, EncryptionError> {
        let blob = self.encrypt(plaintext)?;
        let serialized =
            serde_json::to_vec(&blob).map_err(|e| EncryptionError::Cipher(e.to_string()))?;
        Ok(BASE64.encode(serialized))
    }

    /// Decode a base64 string and decrypt the contained payload.
    pub fn decrypt_from_string(&self, encoded: &str) -> Result<Vec<u8>, EncryptionError> {
        let decoded = BASE64.decode(encoded).map_err(|e| EncryptionError::Decode(e.to_string()))?;
        let blob: EncryptedBlob =
            serde_json::from_slice(&decoded).map_err(|e| EncryptionError::Decode(e.to_string()))?;
        self.decrypt(&blob)
    }
}

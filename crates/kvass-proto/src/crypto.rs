//! Authenticated encryption of sync payloads using AES-256-GCM.
//!
//! Sealed layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! A fresh random nonce is drawn for every call to [`SyncCipher::encrypt`].

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use kvass_core::ENCRYPTION_KEY_LEN;

/// Nonce size for AES-GCM (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Symmetric cipher keyed by a node's sync key.
pub struct SyncCipher {
    cipher: Aes256Gcm,
}

impl SyncCipher {
    /// Create a cipher from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKey` unless `key` is exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != ENCRYPTION_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {ENCRYPTION_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// Create a cipher from a hex-encoded key, as stored in node state.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKey` if the string is not hex or does not
    /// decode to 32 bytes.
    pub fn from_hex(key_hex: &str) -> Result<Self, CryptoError> {
        let key = hex::decode(key_hex.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not hex: {e}")))?;
        Self::new(&key)
    }

    /// Encrypt a payload.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying cipher rejects the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(sealed)
    }

    /// Decrypt a payload produced by [`SyncCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Authentication` if the payload is shorter than a
    /// nonce or the tag does not verify. No plaintext is returned in that case.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::Authentication);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Authentication)
    }
}

impl std::fmt::Debug for SyncCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCipher").finish_non_exhaustive()
    }
}

/// Errors from payload encryption.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// The configured key is malformed
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    /// Payload truncated, tampered with, or sealed under another key
    #[error("payload failed authentication")]
    Authentication,
    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encrypt(String),
}

//! Symmetric encryption for session tokens at rest.
//!
//! Ciphertexts are base64 of `nonce[12] || ciphertext_with_tag`. A fresh
//! random nonce is drawn for every encryption.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

pub const KEY_ENV_VAR: &str = "SESSION_ENCRYPTION_KEY";

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("decryption failed: wrong key or corrupted data")]
    Decrypt,

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
}

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Builds a vault from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("base64 decode failed: {}", e)))?;
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| CryptoError::InvalidKey(format!("expected {} bytes, got {}", KEY_SIZE, b.len())))?;
        Ok(Self::new(key))
    }

    /// Reads the key from `SESSION_ENCRYPTION_KEY`.
    ///
    /// When the variable is unset a random key is generated. Sessions sealed
    /// with it cannot be read after a restart.
    pub fn from_env() -> Result<Self, CryptoError> {
        match std::env::var(KEY_ENV_VAR) {
            Ok(encoded) => Self::from_base64_key(&encoded),
            Err(_) => {
                tracing::warn!(
                    "{} not set, using an ephemeral key; stored sessions will not survive a restart",
                    KEY_ENV_VAR
                );
                Ok(Self::new(Self::generate_key()))
            }
        }
    }

    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        key
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Malformed(format!("encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let data = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::Malformed(format!("base64 decode failed: {}", e)))?;

        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Malformed("too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Malformed(format!("not valid UTF-8: {}", e)))
    }
}

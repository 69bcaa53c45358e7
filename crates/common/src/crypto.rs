//! Token encryption primitives
//!
//! Provides the [`TokenCipher`] collaborator used by the connection store to
//! encrypt OAuth token fields before they touch persistent storage, and an
//! AES-256-GCM implementation with optional Argon2 password-based key
//! derivation. The key is passed in at construction; there is no module-level
//! key cache.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::password_hash::rand_core::{OsRng, RngCore};
use argon2::password_hash::SaltString;
use argon2::Argon2;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Encrypt/decrypt collaborator for token-at-rest protection.
///
/// Async so implementations may call out to an external KMS; the bundled
/// [`AesGcmTokenCipher`] is purely local.
#[async_trait]
pub trait TokenCipher: Send + Sync {
    /// Encrypt a plaintext token into an opaque string.
    async fn encrypt(&self, plaintext: &str) -> CommonResult<String>;

    /// Decrypt a string produced by [`encrypt`](Self::encrypt).
    async fn decrypt(&self, ciphertext: &str) -> CommonResult<String>;
}

/// Serialized encrypted payload envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedPayload {
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
    salt: Option<String>,
    algorithm: String,
}

const ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM token cipher with optional password-based key derivation.
pub struct AesGcmTokenCipher {
    cipher: Aes256Gcm,
    password_salt: Option<String>,
}

impl std::fmt::Debug for AesGcmTokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmTokenCipher")
            .field("key", &"[REDACTED]")
            .field("password_salt", &self.password_salt.is_some())
            .finish()
    }
}

impl AesGcmTokenCipher {
    /// Create a cipher from a raw 32-byte key.
    ///
    /// # Errors
    /// Returns an error when the key is not exactly 32 bytes.
    pub fn new(key: &[u8]) -> CommonResult<Self> {
        if key.len() != 32 {
            return Err(CommonError::Crypto("encryption key must be exactly 32 bytes".to_string()));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CommonError::Crypto(format!("failed to create cipher: {e}")))?;

        Ok(Self { cipher, password_salt: None })
    }

    /// Derive an encryption key from a password using Argon2.
    ///
    /// Pass the salt stored alongside previously encrypted data to recreate
    /// the same key; omit it to generate a fresh one.
    ///
    /// # Errors
    /// Returns an error when the salt is malformed or derivation fails.
    pub fn from_password(password: &str, salt: Option<&str>) -> CommonResult<Self> {
        let salt = match salt {
            Some(existing) => SaltString::from_b64(existing)
                .map_err(|e| CommonError::Crypto(format!("invalid password salt: {e}")))?,
            None => SaltString::generate(OsRng),
        };

        let mut key = vec![0u8; 32];
        Argon2::default()
            .hash_password_into(password.as_bytes(), salt.as_str().as_bytes(), &mut key)
            .map_err(|e| CommonError::Crypto(format!("key derivation failed: {e}")))?;

        let mut cipher = Self::new(&key)?;
        cipher.password_salt = Some(salt.to_string());
        Ok(cipher)
    }

    /// Generate a random 32-byte symmetric key.
    #[must_use]
    pub fn generate_key() -> Vec<u8> {
        let mut key = vec![0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    fn encrypt_str(&self, plaintext: &str) -> CommonResult<String> {
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(&Nonce::from(nonce), plaintext.as_bytes())
            .map_err(|e| CommonError::Crypto(format!("encryption failed: {e}")))?;

        let payload = EncryptedPayload {
            nonce: nonce.to_vec(),
            ciphertext,
            salt: self.password_salt.clone(),
            algorithm: ALGORITHM.to_string(),
        };
        Ok(BASE64.encode(serde_json::to_vec(&payload)?))
    }

    fn decrypt_str(&self, encoded: &str) -> CommonResult<String> {
        let decoded = BASE64
            .decode(encoded)
            .map_err(|e| CommonError::Crypto(format!("base64 decode failed: {e}")))?;
        let payload: EncryptedPayload = serde_json::from_slice(&decoded)?;

        if payload.algorithm != ALGORITHM {
            return Err(CommonError::Crypto(format!(
                "unsupported algorithm: {}",
                payload.algorithm
            )));
        }

        let nonce: [u8; 12] = payload
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| CommonError::Crypto("nonce must be exactly 12 bytes".to_string()))?;

        let plaintext = self
            .cipher
            .decrypt(&Nonce::from(nonce), payload.ciphertext.as_ref())
            .map_err(|e| CommonError::Crypto(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| CommonError::Crypto(format!("decrypted payload is not UTF-8: {e}")))
    }
}

#[async_trait]
impl TokenCipher for AesGcmTokenCipher {
    async fn encrypt(&self, plaintext: &str) -> CommonResult<String> {
        self.encrypt_str(plaintext)
    }

    async fn decrypt(&self, ciphertext: &str) -> CommonResult<String> {
        self.decrypt_str(ciphertext)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the AES-GCM token cipher.
    use super::*;

    #[test]
    fn generate_key_has_correct_length() {
        assert_eq!(AesGcmTokenCipher::generate_key().len(), 32);
    }

    #[test]
    fn rejects_invalid_key_size() {
        assert!(AesGcmTokenCipher::new(&[0u8; 16]).is_err());
    }

    #[tokio::test]
    async fn encrypt_and_decrypt_round_trip() {
        let cipher = AesGcmTokenCipher::new(&AesGcmTokenCipher::generate_key()).unwrap();
        let encrypted = cipher.encrypt("ya29.secret-access-token").await.unwrap();
        assert_ne!(encrypted, "ya29.secret-access-token");
        let decrypted = cipher.decrypt(&encrypted).await.unwrap();
        assert_eq!(decrypted, "ya29.secret-access-token");
    }

    #[tokio::test]
    async fn password_derivation_is_reproducible_with_salt() {
        let first = AesGcmTokenCipher::from_password("hunter2", None).unwrap();
        let salt = first.password_salt.clone().unwrap();
        let encrypted = first.encrypt("refresh-token").await.unwrap();

        let second = AesGcmTokenCipher::from_password("hunter2", Some(&salt)).unwrap();
        assert_eq!(second.decrypt(&encrypted).await.unwrap(), "refresh-token");
    }

    #[tokio::test]
    async fn decrypt_with_wrong_key_fails() {
        let a = AesGcmTokenCipher::new(&AesGcmTokenCipher::generate_key()).unwrap();
        let b = AesGcmTokenCipher::new(&AesGcmTokenCipher::generate_key()).unwrap();
        let encrypted = a.encrypt("secret").await.unwrap();
        assert!(b.decrypt(&encrypted).await.is_err());
    }

    #[tokio::test]
    async fn decrypt_rejects_garbage() {
        let cipher = AesGcmTokenCipher::new(&AesGcmTokenCipher::generate_key()).unwrap();
        assert!(cipher.decrypt("not base64!").await.is_err());
    }
}

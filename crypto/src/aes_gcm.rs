use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::{CryptoError, CryptoResult};

/// AES-256-GCM encryptor.
///
/// 96-bit random nonces, authentication tag appended to the ciphertext by the
/// AEAD construction, key zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct Aes256GcmEncryptor {
    #[zeroize(skip)]
    cipher: Aes256Gcm,
    key: [u8; 32],
}

/// Nonce and ciphertext of a single AES-256-GCM encryption, base64-encoded.
///
/// Maps onto the `{algorithm, iv, data}` on-disk layout the configuration
/// core writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub iv: String,
    pub data: String,
}

impl Aes256GcmEncryptor {
    /// Create an encryptor from a 32-byte key.
    pub fn new(key: [u8; 32]) -> CryptoResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { cipher, key })
    }

    /// Create from a base64-encoded 32-byte key.
    pub fn from_base64(key_b64: &str) -> CryptoResult<Self> {
        let key_bytes = BASE64.decode(key_b64).map_err(|_| CryptoError::InvalidKey)?;
        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                got: key_bytes.len(),
            });
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);
        Self::new(key)
    }

    /// Generate a cryptographically secure random key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypt, returning the base64 nonce and ciphertext separately.
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<EncryptedPayload> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(EncryptedPayload {
            iv: BASE64.encode(nonce_bytes),
            data: BASE64.encode(&ciphertext),
        })
    }

    /// Decrypt a payload produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, payload: &EncryptedPayload) -> CryptoResult<Vec<u8>> {
        let nonce_bytes = BASE64
            .decode(&payload.iv)
            .map_err(|_| CryptoError::InvalidFormat)?;
        if nonce_bytes.len() != 12 {
            return Err(CryptoError::InvalidNonce);
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(&payload.data)
            .map_err(|_| CryptoError::InvalidFormat)?;

        self.cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Encrypt a string into the compact `{iv}:{data}` form used by the
    /// pseudonym registry's `encryption` strategy.
    pub fn encrypt_string(&self, plaintext: &str) -> CryptoResult<String> {
        let payload = self.encrypt(plaintext.as_bytes())?;
        Ok(format!("{}:{}", payload.iv, payload.data))
    }

    /// Decrypt a compact `{iv}:{data}` string.
    pub fn decrypt_string(&self, encrypted: &str) -> CryptoResult<String> {
        let (iv, data) = encrypted
            .split_once(':')
            .ok_or(CryptoError::InvalidFormat)?;
        let plaintext = self.decrypt(&EncryptedPayload {
            iv: iv.to_string(),
            data: data.to_string(),
        })?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// Expose the raw key for re-wrapping. Callers must zeroize copies.
    pub fn key_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

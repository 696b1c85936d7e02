use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::aes_gcm::EncryptedPayload;
use crate::error::{CryptoError, CryptoResult};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256-CBC decryptor for configuration payloads written by older
/// deployments. Unauthenticated, so only the read path exists; re-encryption
/// always goes through AES-256-GCM.
pub struct Aes256CbcDecryptor {
    key: [u8; 32],
}

impl Aes256CbcDecryptor {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn decrypt(&self, payload: &EncryptedPayload) -> CryptoResult<Vec<u8>> {
        let iv = BASE64
            .decode(&payload.iv)
            .map_err(|_| CryptoError::InvalidFormat)?;
        if iv.len() != 16 {
            return Err(CryptoError::InvalidNonce);
        }

        let ciphertext = BASE64
            .decode(&payload.data)
            .map_err(|_| CryptoError::InvalidFormat)?;

        let cipher = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|_| CryptoError::InvalidKey)?;

        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

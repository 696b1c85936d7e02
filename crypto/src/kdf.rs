use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoResult;

/// PBKDF2 parameters for deriving the configuration encryption key.
#[derive(Debug, Clone)]
pub struct Pbkdf2Params {
    /// Iteration count. Production deployments use at least 100,000.
    pub iterations: u32,
    /// Salt length in bytes for newly generated salts.
    pub salt_length: usize,
}

impl Default for Pbkdf2Params {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            salt_length: 32,
        }
    }
}

/// Key derivation helpers.
pub struct Kdf;

impl Kdf {
    /// Derive key material with PBKDF2-HMAC-SHA256.
    pub fn pbkdf2(
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        key_length: usize,
    ) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let mut derived = Zeroizing::new(vec![0u8; key_length]);
        pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut derived);
        Ok(derived)
    }

    /// Derive a 32-byte AES-256 key.
    pub fn derive_aes256_key(
        password: &[u8],
        salt: &[u8],
        params: &Pbkdf2Params,
    ) -> CryptoResult<[u8; 32]> {
        let derived = Self::pbkdf2(password, salt, params.iterations, 32)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&derived);
        Ok(key)
    }

    /// Generate a cryptographically secure random salt.
    pub fn generate_salt(length: usize) -> Vec<u8> {
        let mut salt = vec![0u8; length];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key material")]
    InvalidKey,

    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid nonce/IV")]
    InvalidNonce,

    #[error("Invalid ciphertext format")]
    InvalidFormat,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed (wrong key or tampered ciphertext)")]
    DecryptionFailed,

    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Unsupported encryption algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

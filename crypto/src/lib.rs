//! Cryptographic primitives for the audit platform.
//!
//! Two consumers: the configuration core (encrypted-at-rest config payloads,
//! PBKDF2 key derivation from the operator password) and the pseudonym
//! registry (reversible `encryption` strategy). AES-256-GCM is the write
//! path; AES-256-CBC payloads from older deployments decrypt but are never
//! produced.

pub mod aes_cbc;
pub mod aes_gcm;
pub mod error;
pub mod kdf;

pub use aes_cbc::*;
pub use aes_gcm::*;
pub use error::*;
pub use kdf::*;

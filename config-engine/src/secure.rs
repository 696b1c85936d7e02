use std::path::Path;

use crypto::{Aes256CbcDecryptor, Aes256GcmEncryptor, EncryptedPayload, Kdf, Pbkdf2Params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{AuditConfig, Environment};

/// On-disk layout of an encrypted configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedConfigFile {
    pub algorithm: String,
    pub iv: String,
    pub data: String,
}

/// Encrypted-at-rest configuration storage.
///
/// The key derives from `AUDIT_CONFIG_PASSWORD` and the configured salt via
/// PBKDF2-HMAC-SHA256. AES-256-GCM is written; AES-256-CBC payloads from
/// older deployments are still readable.
pub struct SecureConfigStorage {
    key: [u8; 32],
}

impl SecureConfigStorage {
    pub fn new(password: &str, salt: &str, iterations: u32) -> ConfigResult<Self> {
        if password.is_empty() {
            return Err(ConfigError::Encryption(
                "AUDIT_CONFIG_PASSWORD is not set".to_string(),
            ));
        }
        let params = Pbkdf2Params {
            iterations,
            ..Default::default()
        };
        let key = Kdf::derive_aes256_key(password.as_bytes(), salt.as_bytes(), &params)
            .map_err(|e| ConfigError::Encryption(e.to_string()))?;
        Ok(Self { key })
    }

    /// Build from the environment: `AUDIT_CONFIG_PASSWORD` (required) and
    /// `AUDIT_CONFIG_SALT` (defaults to the application identifier).
    /// Production derivations use at least 100k iterations.
    pub fn from_env(environment: Environment) -> ConfigResult<Self> {
        let password = std::env::var("AUDIT_CONFIG_PASSWORD")
            .map_err(|_| ConfigError::Encryption("AUDIT_CONFIG_PASSWORD is not set".to_string()))?;
        let salt =
            std::env::var("AUDIT_CONFIG_SALT").unwrap_or_else(|_| "audit-platform".to_string());
        let iterations = match environment {
            Environment::Production => 100_000,
            _ => 10_000,
        };
        Self::new(&password, &salt, iterations)
    }

    pub fn encrypt_config(&self, config: &AuditConfig) -> ConfigResult<EncryptedConfigFile> {
        let plaintext = serde_json::to_vec(config)?;
        let encryptor = Aes256GcmEncryptor::new(self.key)
            .map_err(|e| ConfigError::Encryption(e.to_string()))?;
        let payload = encryptor
            .encrypt(&plaintext)
            .map_err(|e| ConfigError::Encryption(e.to_string()))?;
        Ok(EncryptedConfigFile {
            algorithm: "AES-256-GCM".to_string(),
            iv: payload.iv,
            data: payload.data,
        })
    }

    pub fn decrypt_config(&self, file: &EncryptedConfigFile) -> ConfigResult<AuditConfig> {
        let payload = EncryptedPayload {
            iv: file.iv.clone(),
            data: file.data.clone(),
        };

        let plaintext = match file.algorithm.as_str() {
            "AES-256-GCM" => Aes256GcmEncryptor::new(self.key)
                .map_err(|e| ConfigError::Encryption(e.to_string()))?
                .decrypt(&payload)
                .map_err(|e| ConfigError::Encryption(e.to_string()))?,
            "AES-256-CBC" => Aes256CbcDecryptor::new(self.key)
                .decrypt(&payload)
                .map_err(|e| ConfigError::Encryption(e.to_string()))?,
            other => {
                return Err(ConfigError::Encryption(format!(
                    "unsupported algorithm {other}"
                )))
            }
        };

        Ok(serde_json::from_slice(&plaintext)?)
    }

    pub fn save(&self, config: &AuditConfig, path: &Path) -> ConfigResult<()> {
        let encrypted = self.encrypt_config(config)?;
        std::fs::write(path, serde_json::to_vec_pretty(&encrypted)?)?;
        debug!(path = %path.display(), "encrypted configuration written");
        Ok(())
    }

    pub fn load(&self, path: &Path) -> ConfigResult<AuditConfig> {
        let raw = std::fs::read(path)?;
        let file: EncryptedConfigFile = serde_json::from_slice(&raw)?;
        self.decrypt_config(&file)
    }
}

/// Whether a file on disk is an encrypted payload rather than plain JSON.
pub fn is_encrypted_payload(raw: &[u8]) -> bool {
    serde_json::from_slice::<EncryptedConfigFile>(raw).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SecureConfigStorage {
        SecureConfigStorage::new("operator-password", "test-salt", 1_000).unwrap()
    }

    #[test]
    fn test_missing_password_is_error() {
        assert!(matches!(
            SecureConfigStorage::new("", "salt", 1_000),
            Err(ConfigError::Encryption(_))
        ));
    }

    #[test]
    fn test_roundtrip() {
        let storage = storage();
        let mut config = AuditConfig::default();
        config.worker.concurrency = 6;

        let encrypted = storage.encrypt_config(&config).unwrap();
        assert_eq!(encrypted.algorithm, "AES-256-GCM");

        let decrypted = storage.decrypt_config(&encrypted).unwrap();
        assert_eq!(decrypted.worker.concurrency, 6);
    }

    #[test]
    fn test_wrong_password_fails() {
        let a = storage();
        let b = SecureConfigStorage::new("other-password", "test-salt", 1_000).unwrap();

        let encrypted = a.encrypt_config(&AuditConfig::default()).unwrap();
        assert!(matches!(
            b.decrypt_config(&encrypted),
            Err(ConfigError::Encryption(_))
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let storage = storage();
        let file = EncryptedConfigFile {
            algorithm: "ROT13".to_string(),
            iv: String::new(),
            data: String::new(),
        };
        assert!(matches!(
            storage.decrypt_config(&file),
            Err(ConfigError::Encryption(_))
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let storage = storage();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit-config.enc.json");

        storage.save(&AuditConfig::default(), &path).unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert!(is_encrypted_payload(&raw));

        let loaded = storage.load(&path).unwrap();
        assert_eq!(loaded.worker.queue_name, "audit-events");
    }
}

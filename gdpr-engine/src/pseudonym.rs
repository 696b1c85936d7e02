use chrono::{DateTime, Utc};
use crypto::Aes256GcmEncryptor;
use database_layer::{fmt_ts, parse_ts, DatabasePool};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::debug;

use crate::error::{GdprError, GdprResult};

/// How a pseudonym is derived from the original identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PseudonymStrategy {
    /// Deterministic: `pseudo-` + first 16 hex chars of
    /// `SHA-256(originalId || salt)`. Stable across runs for a given salt.
    Hash,
    /// Random token; only the stored mapping binds the two identifiers.
    Token,
    /// Symmetric encryption of the original id, reversible by the key holder.
    Encryption,
}

impl PseudonymStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PseudonymStrategy::Hash => "hash",
            PseudonymStrategy::Token => "token",
            PseudonymStrategy::Encryption => "encryption",
        }
    }
}

/// One row of the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PseudonymMapping {
    pub original_id: String,
    pub pseudonym_id: String,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    pub context: Option<String>,
}

/// Durable bi-directional registry of original ↔ pseudonym mappings.
///
/// Mappings back GDPR erasure audit trails, so they persist in
/// `pseudonym_mapping`; both lookup directions are index-backed.
#[derive(Clone)]
pub struct PseudonymRegistry {
    db: DatabasePool,
    salt: String,
    encryptor: Option<std::sync::Arc<Aes256GcmEncryptor>>,
}

impl PseudonymRegistry {
    /// An unset salt is a startup error, never a silent fallback.
    pub fn new(db: DatabasePool, salt: impl Into<String>) -> GdprResult<Self> {
        let salt = salt.into();
        if salt.trim().is_empty() {
            return Err(GdprError::MissingSalt);
        }
        Ok(Self {
            db,
            salt,
            encryptor: None,
        })
    }

    /// Enable the `encryption` strategy with a 32-byte key.
    pub fn with_encryption_key(mut self, key: [u8; 32]) -> GdprResult<Self> {
        self.encryptor = Some(std::sync::Arc::new(Aes256GcmEncryptor::new(key)?));
        Ok(self)
    }

    /// Create (or return the existing) pseudonym for an original id.
    pub async fn create_pseudonym(
        &self,
        original_id: &str,
        strategy: PseudonymStrategy,
    ) -> GdprResult<String> {
        if let Some(existing) = self.lookup(original_id).await? {
            debug!(original = original_id, "existing pseudonym mapping reused");
            return Ok(existing);
        }

        let pseudonym_id = loop {
            let candidate = match strategy {
                PseudonymStrategy::Hash => self.derive_hash_pseudonym(original_id),
                PseudonymStrategy::Token => Self::random_token_pseudonym(),
                PseudonymStrategy::Encryption => {
                    let encryptor = self
                        .encryptor
                        .as_ref()
                        .ok_or(GdprError::MissingEncryptionKey)?;
                    format!("pseudo-{}", encryptor.encrypt_string(original_id)?)
                }
            };

            if self.reverse(&candidate).await?.is_none() {
                break candidate;
            }
            // Deterministic strategies cannot escape a collision by redrawing.
            if strategy != PseudonymStrategy::Token {
                break candidate;
            }
        };

        sqlx::query(
            r#"
            INSERT INTO pseudonym_mapping (
                original_id, pseudonym_id, strategy, created_at, context
            ) VALUES (?, ?, ?, ?, NULL)
            "#,
        )
        .bind(original_id)
        .bind(&pseudonym_id)
        .bind(strategy.as_str())
        .bind(fmt_ts(Utc::now()))
        .execute(self.db.pool())
        .await?;

        Ok(pseudonym_id)
    }

    /// Forward lookup: original → pseudonym.
    pub async fn lookup(&self, original_id: &str) -> GdprResult<Option<String>> {
        let row =
            sqlx::query("SELECT pseudonym_id FROM pseudonym_mapping WHERE original_id = ?")
                .bind(original_id)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row
            .map(|r| r.try_get::<String, _>("pseudonym_id"))
            .transpose()?)
    }

    /// Reverse lookup: pseudonym → original.
    pub async fn reverse(&self, pseudonym_id: &str) -> GdprResult<Option<String>> {
        let row =
            sqlx::query("SELECT original_id FROM pseudonym_mapping WHERE pseudonym_id = ?")
                .bind(pseudonym_id)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row
            .map(|r| r.try_get::<String, _>("original_id"))
            .transpose()?)
    }

    pub async fn exists(&self, original_id: &str) -> GdprResult<bool> {
        Ok(self.lookup(original_id).await?.is_some())
    }

    pub async fn get_mapping(&self, original_id: &str) -> GdprResult<PseudonymMapping> {
        let row = sqlx::query("SELECT * FROM pseudonym_mapping WHERE original_id = ?")
            .bind(original_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| GdprError::MappingNotFound(original_id.to_string()))?;

        Ok(PseudonymMapping {
            original_id: row.try_get("original_id")?,
            pseudonym_id: row.try_get("pseudonym_id")?,
            strategy: row.try_get("strategy")?,
            created_at: parse_ts(row.try_get::<String, _>("created_at")?.as_str())
                .map_err(GdprError::DatabaseError)?,
            context: row.try_get("context")?,
        })
    }

    /// Decrypt an `encryption`-strategy pseudonym without touching the store.
    pub fn decrypt_pseudonym(&self, pseudonym_id: &str) -> GdprResult<String> {
        let encryptor = self
            .encryptor
            .as_ref()
            .ok_or(GdprError::MissingEncryptionKey)?;
        let payload = pseudonym_id
            .strip_prefix("pseudo-")
            .ok_or_else(|| GdprError::MappingNotFound(pseudonym_id.to_string()))?;
        Ok(encryptor.decrypt_string(payload)?)
    }

    fn derive_hash_pseudonym(&self, original_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(original_id.as_bytes());
        hasher.update(self.salt.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("pseudo-{}", &digest[..16])
    }

    fn random_token_pseudonym() -> String {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        format!("pseudo-{hex}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> PseudonymRegistry {
        PseudonymRegistry::new(DatabasePool::in_memory().await.unwrap(), "unit-test-salt")
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_salt_is_startup_error() {
        let db = DatabasePool::in_memory().await.unwrap();
        assert!(matches!(
            PseudonymRegistry::new(db, "  "),
            Err(GdprError::MissingSalt)
        ));
    }

    #[tokio::test]
    async fn test_hash_strategy_deterministic() {
        let registry = registry().await;
        let first = registry
            .create_pseudonym("subject-1", PseudonymStrategy::Hash)
            .await
            .unwrap();
        let second = registry
            .create_pseudonym("subject-1", PseudonymStrategy::Hash)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("pseudo-"));
        assert_eq!(first.len(), "pseudo-".len() + 16);
    }

    #[tokio::test]
    async fn test_hash_strategy_salt_sensitivity() {
        let db = DatabasePool::in_memory().await.unwrap();
        let a = PseudonymRegistry::new(db.clone(), "salt-a").unwrap();
        let b = PseudonymRegistry::new(db, "salt-b").unwrap();

        assert_ne!(
            a.derive_hash_pseudonym("subject-1"),
            b.derive_hash_pseudonym("subject-1")
        );
    }

    #[tokio::test]
    async fn test_token_strategy_persists_binding() {
        let registry = registry().await;
        let pseudonym = registry
            .create_pseudonym("subject-2", PseudonymStrategy::Token)
            .await
            .unwrap();

        // Stable within the deployment: same mapping returned.
        let again = registry
            .create_pseudonym("subject-2", PseudonymStrategy::Token)
            .await
            .unwrap();
        assert_eq!(pseudonym, again);

        assert_eq!(
            registry.reverse(&pseudonym).await.unwrap().as_deref(),
            Some("subject-2")
        );
    }

    #[tokio::test]
    async fn test_bidirectional_lookup() {
        let registry = registry().await;
        let pseudonym = registry
            .create_pseudonym("subject-3", PseudonymStrategy::Hash)
            .await
            .unwrap();

        assert_eq!(
            registry.lookup("subject-3").await.unwrap().as_deref(),
            Some(pseudonym.as_str())
        );
        assert_eq!(
            registry.reverse(&pseudonym).await.unwrap().as_deref(),
            Some("subject-3")
        );
        assert!(registry.exists("subject-3").await.unwrap());
        assert!(!registry.exists("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn test_encryption_strategy_reversible() {
        let key = Aes256GcmEncryptor::generate_key();
        let registry = PseudonymRegistry::new(
            DatabasePool::in_memory().await.unwrap(),
            "unit-test-salt",
        )
        .unwrap()
        .with_encryption_key(key)
        .unwrap();

        let pseudonym = registry
            .create_pseudonym("subject-4", PseudonymStrategy::Encryption)
            .await
            .unwrap();

        assert_eq!(registry.decrypt_pseudonym(&pseudonym).unwrap(), "subject-4");
        assert_eq!(
            registry.reverse(&pseudonym).await.unwrap().as_deref(),
            Some("subject-4")
        );
    }

    #[tokio::test]
    async fn test_encryption_without_key_fails() {
        let registry = registry().await;
        assert!(matches!(
            registry
                .create_pseudonym("subject-5", PseudonymStrategy::Encryption)
                .await,
            Err(GdprError::MissingEncryptionKey)
        ));
    }

    #[tokio::test]
    async fn test_mapping_metadata() {
        let registry = registry().await;
        registry
            .create_pseudonym("subject-6", PseudonymStrategy::Hash)
            .await
            .unwrap();

        let mapping = registry.get_mapping("subject-6").await.unwrap();
        assert_eq!(mapping.original_id, "subject-6");
        assert_eq!(mapping.strategy, "hash");
    }
}

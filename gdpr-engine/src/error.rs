use error_common::{AuditError, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GdprError {
    #[error("Pseudonymization salt is not configured")]
    MissingSalt,

    #[error("Encryption strategy requires a configured key")]
    MissingEncryptionKey,

    #[error("No data found for subject {0}")]
    NoDataForSubject(String),

    #[error("Pseudonym mapping not found for {0}")]
    MappingNotFound(String),

    #[error("Export serialization failed: {0}")]
    ExportFailed(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] crypto::CryptoError),

    #[error("Storage error: {0}")]
    DatabaseError(#[from] database_layer::DatabaseError),

    #[error("Storage error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Event error: {0}")]
    EventError(#[from] AuditError),
}

impl From<GdprError> for AuditError {
    fn from(err: GdprError) -> Self {
        match err {
            GdprError::EventError(inner) => inner,
            GdprError::DatabaseError(inner) => inner.into(),
            GdprError::MissingSalt | GdprError::MissingEncryptionKey => {
                AuditError::new(ErrorKind::ConfigValidation, err.to_string())
            }
            other => AuditError::new(ErrorKind::Internal, other.to_string()),
        }
    }
}

pub type GdprResult<T> = Result<T, GdprError>;

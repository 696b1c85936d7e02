use error_common::{AuditError, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Idempotency key collision with differing payload: {0}")]
    Conflict(String),

    #[error("Retention policy invalid: {0}")]
    InvalidPolicy(String),

    #[error("Row not found")]
    NotFound,

    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Event error: {0}")]
    EventError(#[from] AuditError),
}

impl DatabaseError {
    /// Map into the platform taxonomy for cross-boundary propagation.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatabaseError::Conflict(_) => ErrorKind::Conflict,
            DatabaseError::InvalidPolicy(_) => ErrorKind::ConfigValidation,
            DatabaseError::EventError(e) => e.kind,
            _ => ErrorKind::Database,
        }
    }
}

impl From<DatabaseError> for AuditError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::EventError(inner) => inner,
            other => AuditError::new(other.kind(), other.to_string()),
        }
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

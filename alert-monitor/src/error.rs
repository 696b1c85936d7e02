use error_common::{AuditError, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Cross-organization access denied for alert {0}")]
    Forbidden(String),

    #[error("Alert {0} not found")]
    NotFound(String),

    #[error("Alert {0} is already resolved")]
    AlreadyResolved(String),

    #[error("Alert storage error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

impl From<AlertError> for AuditError {
    fn from(err: AlertError) -> Self {
        let kind = match &err {
            AlertError::Forbidden(_) => ErrorKind::Forbidden,
            _ => ErrorKind::Database,
        };
        AuditError::new(kind, err.to_string())
    }
}

pub type AlertResult<T> = Result<T, AlertError>;

use error_common::{AuditError, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Queue storage error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

impl From<QueueError> for AuditError {
    fn from(err: QueueError) -> Self {
        AuditError::new(ErrorKind::Queue, err.to_string())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

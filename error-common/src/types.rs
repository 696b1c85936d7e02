use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error kind taxonomy.
///
/// Kinds, not class names: the dispatch decisions (retry, dead-letter, exit
/// code) key off the kind, never the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Schema/invariant failure at ingestion. Non-retryable; dead-letter.
    InvalidEvent,
    /// Network/timeout/retryable-status failure. Retried with backoff.
    Transient,
    /// Rejected by an open circuit breaker. Non-retryable within this call.
    CircuitOpen,
    /// All retry attempts consumed; wraps the final cause.
    RetryExhausted,
    /// Configuration schema or cross-field constraint failure. Exit 2.
    ConfigValidation,
    /// Configuration decryption/key failure. Exit 2.
    ConfigEncryption,
    /// Stored hash does not match the recomputed hash.
    IntegrityMismatch,
    /// Cross-organization access attempt.
    Forbidden,
    /// Idempotency-key collision with a differing payload.
    Conflict,
    /// Database failure not covered by a more specific kind.
    Database,
    /// Queue adapter failure.
    Queue,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Whether the worker may retry an operation that failed with this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Whether a job failing with this kind goes straight to the dead-letter
    /// stream without retrying.
    pub fn dead_letters_immediately(self) -> bool {
        matches!(self, ErrorKind::InvalidEvent | ErrorKind::Conflict)
    }

    /// Process exit code for CLI entry points.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::ConfigValidation | ErrorKind::ConfigEncryption | ErrorKind::InvalidEvent => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidEvent => "InvalidEvent",
            ErrorKind::Transient => "Transient",
            ErrorKind::CircuitOpen => "CircuitOpen",
            ErrorKind::RetryExhausted => "RetryExhausted",
            ErrorKind::ConfigValidation => "ConfigValidation",
            ErrorKind::ConfigEncryption => "ConfigEncryption",
            ErrorKind::IntegrityMismatch => "IntegrityMismatch",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Database => "Database",
            ErrorKind::Queue => "Queue",
            ErrorKind::Internal => "Internal",
        };
        write!(f, "{name}")
    }
}

/// Structured platform error.
///
/// The `metadata` map must already be masked by the caller; it is considered
/// safe to log and to serialize across component boundaries.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuditError {
    pub kind: ErrorKind,
    pub message: String,
    /// Unique id of this error instance, for tracing.
    pub error_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub metadata: HashMap<String, String>,
    #[serde(skip)]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AuditError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            error_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            request_id: None,
            correlation_id: None,
            metadata: HashMap::new(),
            source: None,
        }
    }

    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidEvent, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(correlation_id) = &self.correlation_id {
            write!(f, " (correlation: {correlation_id})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AuditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result alias used across the platform.
pub type AuditResult<T> = Result<T, AuditError>;

use error_common::{AuditError, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation failed for {field}: {constraint} (got {value})")]
    Validation {
        field: String,
        value: String,
        constraint: String,
    },

    #[error("Configuration encryption error: {0}")]
    Encryption(String),

    #[error("Configuration file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Field {0} is not hot-reloadable; restart required")]
    NotReloadable(String),

    #[error("Unknown configuration field {0}")]
    UnknownField(String),
}

impl ConfigError {
    pub fn validation(
        field: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        ConfigError::Validation {
            field: field.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }
}

impl From<ConfigError> for AuditError {
    fn from(err: ConfigError) -> Self {
        let kind = match &err {
            ConfigError::Encryption(_) => ErrorKind::ConfigEncryption,
            _ => ErrorKind::ConfigValidation,
        };
        let mut audit = AuditError::new(kind, err.to_string());
        if let ConfigError::Validation { field, value, constraint } = &err {
            audit = audit
                .with_metadata("field", field.clone())
                .with_metadata("value", value.clone())
                .with_metadata("constraint", constraint.clone());
        }
        audit
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

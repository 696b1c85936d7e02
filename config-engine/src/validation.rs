use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{AuditConfig, Environment};

lazy_static! {
    static ref QUEUE_NAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9._-]+$").unwrap();
    static ref LOG_LEVEL_REGEX: Regex = Regex::new(r"^(debug|info|warn|error)$").unwrap();
}

/// Validate a configuration snapshot: per-field constraints, cross-field
/// rules, and environment-specific rules. The first violation is returned as
/// `ConfigValidation{field, value, constraint}`.
pub fn validate(config: &AuditConfig) -> ConfigResult<()> {
    validate_fields(config)?;
    validate_cross_field(config)?;
    validate_environment_rules(config)?;
    Ok(())
}

fn validate_fields(config: &AuditConfig) -> ConfigResult<()> {
    if config.database.url.trim().is_empty() {
        return Err(ConfigError::validation("database.url", "", "required"));
    }
    if config.database.pool_size == 0 {
        return Err(ConfigError::validation(
            "database.poolSize",
            config.database.pool_size.to_string(),
            "must be >= 1",
        ));
    }
    if config.worker.concurrency == 0 || config.worker.concurrency > 64 {
        return Err(ConfigError::validation(
            "worker.concurrency",
            config.worker.concurrency.to_string(),
            "must be between 1 and 64",
        ));
    }
    if !QUEUE_NAME_REGEX.is_match(&config.worker.queue_name) {
        return Err(ConfigError::validation(
            "worker.queueName",
            &config.worker.queue_name,
            "must match ^[A-Za-z0-9._-]+$",
        ));
    }
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::validation(
            "retry.maxAttempts",
            config.retry.max_attempts.to_string(),
            "must be >= 1",
        ));
    }
    if config.retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "retry.backoffMultiplier",
            config.retry.backoff_multiplier.to_string(),
            "must be >= 1.0",
        ));
    }
    if !LOG_LEVEL_REGEX.is_match(&config.logging.level) {
        return Err(ConfigError::validation(
            "logging.level",
            &config.logging.level,
            "one of debug|info|warn|error",
        ));
    }
    if config.compliance.default_retention_days == 0 {
        return Err(ConfigError::validation(
            "compliance.defaultRetentionDays",
            "0",
            "must be >= 1",
        ));
    }
    Ok(())
}

fn validate_cross_field(config: &AuditConfig) -> ConfigResult<()> {
    if config.retry.max_delay_ms < config.retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "retry.maxDelayMs",
            config.retry.max_delay_ms.to_string(),
            "must be >= retry.initialDelayMs",
        ));
    }

    let error_rate = config.monitoring.alert_thresholds.error_rate;
    if !(0.0..=1.0).contains(&error_rate) {
        return Err(ConfigError::validation(
            "monitoring.alertThresholds.errorRate",
            error_rate.to_string(),
            "must be within [0, 1]",
        ));
    }
    let memory_usage = config.monitoring.alert_thresholds.memory_usage;
    if !(0.0..=1.0).contains(&memory_usage) {
        return Err(ConfigError::validation(
            "monitoring.alertThresholds.memoryUsage",
            memory_usage.to_string(),
            "must be within [0, 1]",
        ));
    }

    if config.security.enable_log_encryption
        && config
            .security
            .encryption_key
            .as_deref()
            .map_or(true, |key| key.trim().is_empty())
    {
        return Err(ConfigError::validation(
            "security.encryptionKey",
            "<unset>",
            "required when security.enableLogEncryption is true",
        ));
    }

    if config.compliance.reporting_schedule.enabled
        && config.compliance.reporting_schedule.recipients.is_empty()
    {
        return Err(ConfigError::validation(
            "compliance.reportingSchedule.recipients",
            "[]",
            "must be non-empty when reporting is enabled",
        ));
    }

    Ok(())
}

fn validate_environment_rules(config: &AuditConfig) -> ConfigResult<()> {
    if config.environment != Environment::Production {
        return Ok(());
    }

    if !config.security.enable_integrity_verification {
        return Err(ConfigError::validation(
            "security.enableIntegrityVerification",
            "false",
            "must be true in production",
        ));
    }
    if !config.database.ssl {
        return Err(ConfigError::validation(
            "database.ssl",
            "false",
            "must be true in production",
        ));
    }
    if config.logging.level == "debug" {
        return Err(ConfigError::validation(
            "logging.level",
            "debug",
            "debug level is not permitted in production",
        ));
    }
    Ok(())
}

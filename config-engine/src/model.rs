use chrono::{DateTime, Utc};
use resilience::{CircuitBreakerConfig, RetryConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
    Test,
}

impl Environment {
    pub fn parse(s: &str) -> ConfigResult<Self> {
        match s {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(ConfigError::validation(
                "environment",
                other,
                "one of development|staging|production|test",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisConfig {
    pub url: String,
    pub connect_timeout: u64,
    pub command_timeout: u64,
    pub max_retries_per_request: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: 10_000,
            command_timeout: 5_000,
            max_retries_per_request: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub url: String,
    pub ssl: bool,
    pub pool_size: u32,
    pub connection_timeout: u64,
    pub query_timeout: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://audit.db".to_string(),
            ssl: false,
            pool_size: 10,
            connection_timeout: 30_000,
            query_timeout: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    pub concurrency: u32,
    pub queue_name: String,
    pub port: u16,
    pub shutdown_timeout: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            queue_name: "audit-events".to_string(),
            port: 8080,
            shutdown_timeout: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeadLetterConfig {
    pub queue_name: String,
    pub alert_threshold: u64,
    /// Retention of dead-letter entries, in milliseconds.
    pub max_retention_time: u64,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            queue_name: "audit-events-dead".to_string(),
            alert_threshold: 100,
            max_retention_time: 7 * 24 * 3_600 * 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertThresholds {
    /// Fraction of failed jobs, 0.0 – 1.0.
    pub error_rate: f64,
    /// Milliseconds.
    pub processing_latency: u64,
    pub queue_depth: u64,
    /// Fraction of available memory, 0.0 – 1.0.
    pub memory_usage: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.05,
            processing_latency: 5_000,
            queue_depth: 1_000,
            memory_usage: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub metrics_interval: u64,
    pub health_check_interval: u64,
    pub alert_thresholds: AlertThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_interval: 60_000,
            health_check_interval: 30_000,
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub enable_integrity_verification: bool,
    pub enable_event_signing: bool,
    pub enable_log_encryption: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_integrity_verification: true,
            enable_event_signing: false,
            enable_log_encryption: false,
            encryption_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportingSchedule {
    pub enabled: bool,
    pub frequency: String,
    pub recipients: Vec<String>,
}

impl Default for ReportingSchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: "monthly".to_string(),
            recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComplianceConfig {
    pub enable_gdpr: bool,
    pub default_retention_days: u32,
    pub auto_archival: bool,
    pub reporting_schedule: ReportingSchedule,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            enable_gdpr: true,
            default_retention_days: 730,
            auto_archival: true,
            reporting_schedule: ReportingSchedule::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: String,
    pub structured: bool,
    pub retention_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: true,
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HotReloadConfig {
    pub reloadable_fields: Vec<String>,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            reloadable_fields: vec![
                "logging.level".to_string(),
                "logging.structured".to_string(),
                "worker.concurrency".to_string(),
                "monitoring.enabled".to_string(),
                "monitoring.alertThresholds.errorRate".to_string(),
                "monitoring.alertThresholds.queueDepth".to_string(),
                "retry.maxAttempts".to_string(),
                "deadLetter.alertThreshold".to_string(),
            ],
        }
    }
}

/// Full platform configuration (§6 file layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditConfig {
    pub environment: Environment,
    pub version: u64,
    pub last_updated: DateTime<Utc>,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub dead_letter: DeadLetterConfig,
    pub monitoring: MonitoringConfig,
    pub security: SecurityConfig,
    pub compliance: ComplianceConfig,
    pub logging: LoggingConfig,
    #[serde(rename = "hotReloadConfig")]
    pub hot_reload: HotReloadConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            version: 1,
            last_updated: Utc::now(),
            redis: RedisConfig::default(),
            database: DatabaseConfig::default(),
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            dead_letter: DeadLetterConfig::default(),
            monitoring: MonitoringConfig::default(),
            security: SecurityConfig::default(),
            compliance: ComplianceConfig::default(),
            logging: LoggingConfig::default(),
            hot_reload: HotReloadConfig::default(),
        }
    }
}

impl AuditConfig {
    /// Production-leaning defaults: higher worker concurrency, ssl on.
    pub fn production_defaults() -> Self {
        let mut config = Self {
            environment: Environment::Production,
            ..Default::default()
        };
        config.worker.concurrency = 8;
        config.database.ssl = true;
        config
    }

    /// Apply environment-variable overrides on top of the file contents.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Ok(env) = std::env::var("ENVIRONMENT").or_else(|_| std::env::var("NODE_ENV")) {
            self.environment = Environment::parse(&env)?;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(url) = std::env::var("DATABASE_URL").or_else(|_| std::env::var("AUDIT_DB_URL")) {
            self.database.url = url;
        }
        if let Ok(name) = std::env::var("AUDIT_QUEUE_NAME") {
            self.worker.queue_name = name;
        }
        if let Ok(port) = std::env::var("AUDIT_WORKER_PORT") {
            self.worker.port = port.parse().map_err(|_| {
                ConfigError::validation("worker.port", port, "must be a valid TCP port")
            })?;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }
}

/// The pseudonymization salt comes from the environment and has no fallback;
/// an unset salt is a startup error.
pub fn require_pseudonym_salt() -> ConfigResult<String> {
    match std::env::var("PSEUDONYM_SALT") {
        Ok(salt) if !salt.trim().is_empty() => Ok(salt),
        _ => Err(ConfigError::validation(
            "PSEUDONYM_SALT",
            "<unset>",
            "must be set to a non-empty secret",
        )),
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::masker::DataMasker;

/// Log severity. `fatal` in producer payloads collapses to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" | "fatal" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Output rendering of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
    /// JSON with `@`-prefixed envelope keys, for log shippers.
    Structured,
}

/// A single structured log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            request_id: None,
            correlation_id: None,
            component: None,
            metadata: None,
            error: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Apply the masker to the message, error, and metadata.
    pub fn masked(mut self, masker: &DataMasker) -> Self {
        self.message = masker.mask_text(&self.message);
        if let Some(error) = self.error.take() {
            self.error = Some(masker.mask_text(&error));
        }
        if let Some(metadata) = self.metadata.take() {
            self.metadata = Some(masker.mask_json(&metadata));
        }
        self
    }

    /// Render the entry in the given format.
    pub fn render(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Text => self.render_text(),
            LogFormat::Json => serde_json::to_string(self).unwrap_or_else(|_| self.render_text()),
            LogFormat::Structured => self.render_structured(),
        }
    }

    fn render_text(&self) -> String {
        let mut line = format!(
            "{} [{}] {}",
            self.timestamp.to_rfc3339(),
            self.level.as_str().to_ascii_uppercase(),
            self.message
        );
        if let Some(component) = &self.component {
            line.push_str(&format!(" component={component}"));
        }
        if let Some(correlation_id) = &self.correlation_id {
            line.push_str(&format!(" correlationId={correlation_id}"));
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(" error={error}"));
        }
        line
    }

    fn render_structured(&self) -> String {
        let mut map = Map::new();
        map.insert(
            "@timestamp".to_string(),
            Value::String(self.timestamp.to_rfc3339()),
        );
        map.insert(
            "@level".to_string(),
            Value::String(self.level.as_str().to_string()),
        );
        map.insert("@message".to_string(), Value::String(self.message.clone()));
        if let Some(request_id) = &self.request_id {
            map.insert("@requestId".to_string(), Value::String(request_id.clone()));
        }
        if let Some(correlation_id) = &self.correlation_id {
            map.insert(
                "@correlationId".to_string(),
                Value::String(correlation_id.clone()),
            );
        }
        if let Some(component) = &self.component {
            map.insert("@component".to_string(), Value::String(component.clone()));
        }
        if let Some(metadata) = &self.metadata {
            map.insert("@metadata".to_string(), metadata.clone());
        }
        if let Some(error) = &self.error {
            map.insert("@error".to_string(), Value::String(error.clone()));
        }
        serde_json::to_string(&Value::Object(map)).unwrap_or_else(|_| self.render_text())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_level_parse_collapses_fatal() {
        assert_eq!(LogLevel::parse("fatal"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("nope"), None);
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_text_render() {
        let entry = LogEntry::new(LogLevel::Warn, "queue depth rising")
            .with_component("ingest-worker")
            .with_correlation_id("corr-1");
        let line = entry.render(LogFormat::Text);
        assert!(line.contains("[WARN]"));
        assert!(line.contains("component=ingest-worker"));
        assert!(line.contains("correlationId=corr-1"));
    }

    #[test]
    fn test_structured_render_uses_at_keys() {
        let entry = LogEntry::new(LogLevel::Info, "processed").with_request_id("req-1");
        let value: Value = serde_json::from_str(&entry.render(LogFormat::Structured)).unwrap();
        assert_eq!(value["@level"], "info");
        assert_eq!(value["@message"], "processed");
        assert_eq!(value["@requestId"], "req-1");
    }

    #[test]
    fn test_masked_entry() {
        let masker = DataMasker::new();
        let entry = LogEntry::new(LogLevel::Error, "login for bob@example.com failed")
            .with_metadata(json!({"password": "hunter2"}))
            .masked(&masker);

        assert!(!entry.message.contains("bob@example.com"));
        assert_eq!(entry.metadata.unwrap()["password"], "*******");
    }
}

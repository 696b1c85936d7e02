use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertType {
    Security,
    Performance,
    Compliance,
    System,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Security => "SECURITY",
            AlertType::Performance => "PERFORMANCE",
            AlertType::Compliance => "COMPLIANCE",
            AlertType::System => "SYSTEM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SECURITY" => Some(AlertType::Security),
            "PERFORMANCE" => Some(AlertType::Performance),
            "COMPLIANCE" => Some(AlertType::Compliance),
            "SYSTEM" => Some(AlertType::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "LOW",
            AlertSeverity::Medium => "MEDIUM",
            AlertSeverity::High => "HIGH",
            AlertSeverity::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(AlertSeverity::Low),
            "MEDIUM" => Some(AlertSeverity::Medium),
            "HIGH" => Some(AlertSeverity::High),
            "CRITICAL" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub organization_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub source: String,
    pub title: String,
    pub description: String,
    pub correlation_key: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
}

impl Alert {
    pub fn new(
        organization_id: impl Into<String>,
        alert_type: AlertType,
        severity: AlertSeverity,
        source: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: organization_id.into(),
            alert_type,
            severity,
            source: source.into(),
            title: title.into(),
            description: description.into(),
            correlation_key: None,
            timestamp: Utc::now(),
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        }
    }

    pub fn with_correlation_key(mut self, key: impl Into<String>) -> Self {
        self.correlation_key = Some(key.into());
        self
    }
}

/// Sort column for alert queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertSortBy {
    Timestamp,
    Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Filters for the alert query surface. `organization_id` is mandatory;
/// there is no unscoped read path.
#[derive(Debug, Clone)]
pub struct AlertFilters {
    pub organization_id: String,
    pub severity: Option<AlertSeverity>,
    pub alert_type: Option<AlertType>,
    pub source: Option<String>,
    pub resolved: Option<bool>,
    pub sort_by: AlertSortBy,
    pub sort_order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

impl AlertFilters {
    pub fn for_organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            severity: None,
            alert_type: None,
            source: None,
            resolved: None,
            sort_by: AlertSortBy::Timestamp,
            sort_order: SortOrder::Desc,
            limit: 50,
            offset: 0,
        }
    }
}

/// Per-organization rollup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatistics {
    pub total: u64,
    pub active: u64,
    pub resolved: u64,
    pub by_severity: HashMap<String, u64>,
    pub by_type: HashMap<String, u64>,
}

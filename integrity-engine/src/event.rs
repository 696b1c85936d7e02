use chrono::{DateTime, Duration, Utc};
use error_common::{AuditError, AuditResult};
use serde::{Deserialize, Serialize};

/// Outcome of the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
    Attempt,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Failure => "failure",
            EventStatus::Attempt => "attempt",
        }
    }

    pub fn parse(s: &str) -> AuditResult<Self> {
        match s {
            "success" => Ok(EventStatus::Success),
            "failure" => Ok(EventStatus::Failure),
            "attempt" => Ok(EventStatus::Attempt),
            other => Err(AuditError::invalid_event(format!(
                "unknown event status: {other}"
            ))),
        }
    }
}

/// Data classification driving retention and access rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    Phi,
}

impl DataClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClassification::Public => "PUBLIC",
            DataClassification::Internal => "INTERNAL",
            DataClassification::Confidential => "CONFIDENTIAL",
            DataClassification::Phi => "PHI",
        }
    }

    pub fn parse(s: &str) -> AuditResult<Self> {
        match s {
            "PUBLIC" => Ok(DataClassification::Public),
            "INTERNAL" => Ok(DataClassification::Internal),
            "CONFIDENTIAL" => Ok(DataClassification::Confidential),
            "PHI" => Ok(DataClassification::Phi),
            other => Err(AuditError::invalid_event(format!(
                "unknown data classification: {other}"
            ))),
        }
    }
}

/// Session context captured at the point of the audited action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// An immutable, hash-sealed record of a security- or compliance-relevant
/// action.
///
/// `id` and `processing_latency_ms` are assigned by the store/worker and are
/// excluded from the canonical form, as are `hash` and `archived_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub principal_id: Option<String>,
    pub organization_id: Option<String>,
    pub action: String,
    pub status: EventStatus,
    pub target_resource_type: Option<String>,
    pub target_resource_id: Option<String>,
    pub outcome_description: Option<String>,
    pub data_classification: DataClassification,
    pub retention_policy: String,
    pub correlation_id: Option<String>,
    pub session_context: Option<SessionContext>,
    pub details: Option<serde_json::Value>,
    pub hash: Option<String>,
    pub hash_algorithm: String,
    pub event_version: String,
    pub processing_latency_ms: Option<i64>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// Maximum length of the dotted action string.
pub const MAX_ACTION_LENGTH: usize = 255;

/// Default tolerance for producer clock skew.
pub const DEFAULT_CLOCK_SKEW_TOLERANCE_SECS: i64 = 60;

impl AuditEvent {
    pub fn new(action: impl Into<String>, status: EventStatus) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            principal_id: None,
            organization_id: None,
            action: action.into(),
            status,
            target_resource_type: None,
            target_resource_id: None,
            outcome_description: None,
            data_classification: DataClassification::Internal,
            retention_policy: "standard".to_string(),
            correlation_id: None,
            session_context: None,
            details: None,
            hash: None,
            hash_algorithm: "SHA-256".to_string(),
            event_version: "1.0".to_string(),
            processing_latency_ms: None,
            archived_at: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_target(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.target_resource_type = Some(resource_type.into());
        self.target_resource_id = Some(resource_id.into());
        self
    }

    pub fn with_outcome(mut self, description: impl Into<String>) -> Self {
        self.outcome_description = Some(description.into());
        self
    }

    pub fn with_classification(mut self, classification: DataClassification) -> Self {
        self.data_classification = classification;
        self
    }

    pub fn with_retention_policy(mut self, policy: impl Into<String>) -> Self {
        self.retention_policy = policy.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_session_context(mut self, context: SessionContext) -> Self {
        self.session_context = Some(context);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Check the ingestion invariants.
    ///
    /// `action` and `status` are required (`status` is enforced by the type);
    /// the action is a dotted string of at most 255 bytes; the timestamp may
    /// not lie further in the future than the skew tolerance.
    pub fn validate(&self, clock_skew_tolerance: Duration) -> AuditResult<()> {
        if self.action.trim().is_empty() {
            return Err(AuditError::invalid_event("action is required"));
        }
        if self.action.len() > MAX_ACTION_LENGTH {
            return Err(AuditError::invalid_event(format!(
                "action exceeds {MAX_ACTION_LENGTH} characters"
            )));
        }
        let horizon = Utc::now() + clock_skew_tolerance;
        if self.timestamp > horizon {
            return Err(AuditError::invalid_event(format!(
                "timestamp {} is beyond the clock skew tolerance",
                self.timestamp.to_rfc3339()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let event = AuditEvent::new("auth.login.success", EventStatus::Success);
        assert_eq!(event.data_classification, DataClassification::Internal);
        assert_eq!(event.retention_policy, "standard");
        assert_eq!(event.hash_algorithm, "SHA-256");
        assert!(event.hash.is_none());
        assert!(event.archived_at.is_none());
    }

    #[test]
    fn test_validate_rejects_empty_action() {
        let event = AuditEvent::new("  ", EventStatus::Success);
        let err = event.validate(Duration::seconds(60)).unwrap_err();
        assert_eq!(err.kind, error_common::ErrorKind::InvalidEvent);
    }

    #[test]
    fn test_validate_rejects_oversized_action() {
        let event = AuditEvent::new("a".repeat(256), EventStatus::Success);
        assert!(event.validate(Duration::seconds(60)).is_err());
    }

    #[test]
    fn test_validate_rejects_future_timestamp() {
        let event = AuditEvent::new("data.read", EventStatus::Success)
            .with_timestamp(Utc::now() + Duration::seconds(300));
        assert!(event.validate(Duration::seconds(60)).is_err());
    }

    #[test]
    fn test_validate_accepts_skew_within_tolerance() {
        let event = AuditEvent::new("data.read", EventStatus::Success)
            .with_timestamp(Utc::now() + Duration::seconds(30));
        assert!(event.validate(Duration::seconds(60)).is_ok());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [EventStatus::Success, EventStatus::Failure, EventStatus::Attempt] {
            assert_eq!(EventStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(EventStatus::parse("unknown").is_err());
    }

    #[test]
    fn test_classification_parse_roundtrip() {
        for class in [
            DataClassification::Public,
            DataClassification::Internal,
            DataClassification::Confidential,
            DataClassification::Phi,
        ] {
            assert_eq!(DataClassification::parse(class.as_str()).unwrap(), class);
        }
        assert!(DataClassification::parse("SECRET").is_err());
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let event = AuditEvent::new("auth.login.success", EventStatus::Success)
            .with_principal("u1");
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("principalId").is_some());
        assert!(value.get("dataClassification").is_some());
        assert_eq!(value["status"], "success");
    }
}

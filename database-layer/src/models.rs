use chrono::{DateTime, SecondsFormat, Utc};
use integrity_engine::DataClassification;
use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, DatabaseResult};

/// Canonical timestamp rendering for storage: RFC-3339, millisecond
/// precision, `Z` suffix. Lexicographic order matches chronological order,
/// so range predicates can compare text columns directly.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(s: &str) -> DatabaseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::QueryFailed(format!("invalid stored timestamp {s}: {e}")))
}

/// A retention policy row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    #[serde(default)]
    pub id: Option<i64>,
    pub policy_name: String,
    pub data_classification: DataClassification,
    pub retention_days: i64,
    #[serde(default)]
    pub archive_after_days: Option<i64>,
    #[serde(default)]
    pub delete_after_days: Option<i64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl RetentionPolicy {
    pub fn new(
        policy_name: impl Into<String>,
        data_classification: DataClassification,
        retention_days: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            policy_name: policy_name.into(),
            data_classification,
            retention_days,
            archive_after_days: None,
            delete_after_days: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_archive_after_days(mut self, days: i64) -> Self {
        self.archive_after_days = Some(days);
        self
    }

    pub fn with_delete_after_days(mut self, days: i64) -> Self {
        self.delete_after_days = Some(days);
        self
    }

    /// `archiveAfterDays <= deleteAfterDays <= retentionDays` when present.
    /// Violations are configuration errors, not runtime errors.
    pub fn validate(&self) -> DatabaseResult<()> {
        if self.retention_days < 1 {
            return Err(DatabaseError::InvalidPolicy(format!(
                "{}: retentionDays must be >= 1",
                self.policy_name
            )));
        }
        if let Some(archive) = self.archive_after_days {
            if archive > self.retention_days {
                return Err(DatabaseError::InvalidPolicy(format!(
                    "{}: archiveAfterDays exceeds retentionDays",
                    self.policy_name
                )));
            }
            if let Some(delete) = self.delete_after_days {
                if delete <= archive {
                    return Err(DatabaseError::InvalidPolicy(format!(
                        "{}: deleteAfterDays must be greater than archiveAfterDays",
                        self.policy_name
                    )));
                }
            }
        }
        if let Some(delete) = self.delete_after_days {
            if delete > self.retention_days {
                return Err(DatabaseError::InvalidPolicy(format!(
                    "{}: deleteAfterDays exceeds retentionDays",
                    self.policy_name
                )));
            }
        }
        Ok(())
    }
}

/// Filter for querying the audit log.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub principal_id: Option<String>,
    pub organization_id: Option<String>,
    pub action: Option<String>,
    pub data_classification: Option<DataClassification>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub archived: Option<bool>,
    pub limit: Option<i64>,
}

impl EventFilter {
    pub fn for_principal(principal_id: impl Into<String>) -> Self {
        Self {
            principal_id: Some(principal_id.into()),
            ..Default::default()
        }
    }

    pub fn in_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts(&fmt_ts(now)).unwrap();
        // Millisecond precision is retained, sub-millisecond is truncated.
        assert!((now - parsed).num_milliseconds().abs() < 1);
    }

    #[test]
    fn test_timestamp_text_ordering() {
        let early = fmt_ts("2024-01-01T00:00:00Z".parse().unwrap());
        let late = fmt_ts("2024-06-01T12:30:00.250Z".parse().unwrap());
        assert!(early < late);
    }

    #[test]
    fn test_policy_validation_ordering() {
        let policy = RetentionPolicy::new("phi", DataClassification::Phi, 365)
            .with_archive_after_days(30)
            .with_delete_after_days(90);
        assert!(policy.validate().is_ok());

        let inverted = RetentionPolicy::new("bad", DataClassification::Phi, 365)
            .with_archive_after_days(90)
            .with_delete_after_days(30);
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_policy_validation_bounds() {
        let zero_days = RetentionPolicy::new("zero", DataClassification::Internal, 0);
        assert!(zero_days.validate().is_err());

        let over_retention = RetentionPolicy::new("over", DataClassification::Internal, 30)
            .with_delete_after_days(60);
        assert!(over_retention.validate().is_err());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of verifying a single event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum VerificationStatus {
    Ok,
    Mismatch { expected: String, observed: String },
    MissingHash,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Ok => "ok",
            VerificationStatus::Mismatch { .. } => "mismatch",
            VerificationStatus::MissingHash => "missing_hash",
        }
    }
}

/// A recorded verification outcome, appended to `audit_integrity_log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityVerification {
    pub audit_log_id: i64,
    pub verified_at: DateTime<Utc>,
    pub status: String,
    pub expected_hash: Option<String>,
    pub observed_hash: Option<String>,
    pub verified_by: String,
    pub details: Option<String>,
}

/// Aggregate result of a verification sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSummary {
    pub checked: u64,
    pub ok: u64,
    pub mismatched: u64,
    pub missing_hash: u64,
}

impl VerificationSummary {
    pub fn record(&mut self, status: &VerificationStatus) {
        self.checked += 1;
        match status {
            VerificationStatus::Ok => self.ok += 1,
            VerificationStatus::Mismatch { .. } => self.mismatched += 1,
            VerificationStatus::MissingHash => self.missing_hash += 1,
        }
    }
}

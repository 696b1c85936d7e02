use error_common::{AuditError, AuditResult};
use sha2::{Digest, Sha256};

use crate::canonical::{canonical_event_value, canonical_json};
use crate::event::AuditEvent;
use crate::verification::VerificationStatus;

/// Compute the lowercase hex SHA-256 of an event's canonical form.
///
/// Fails with `InvalidEvent` when required fields are missing.
pub fn hash_event(event: &AuditEvent) -> AuditResult<String> {
    if event.action.trim().is_empty() {
        return Err(AuditError::invalid_event(
            "cannot hash an event without an action",
        ));
    }

    let canonical = canonical_json(&canonical_event_value(event));
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Recompute an event's hash and compare against the stored one.
///
/// Any formatting difference that alters canonical bytes yields a mismatch.
pub fn verify_event(event: &AuditEvent) -> AuditResult<VerificationStatus> {
    let Some(stored) = &event.hash else {
        return Ok(VerificationStatus::MissingHash);
    };

    let recomputed = hash_event(event)?;
    if &recomputed == stored {
        Ok(VerificationStatus::Ok)
    } else {
        Ok(VerificationStatus::Mismatch {
            expected: stored.clone(),
            observed: recomputed,
        })
    }
}

/// Seal an event: compute and store its hash.
pub fn seal_event(event: &mut AuditEvent) -> AuditResult<()> {
    event.hash = Some(hash_event(event)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use super::*;
    use crate::event::{AuditEvent, EventStatus};

    fn fixed_event() -> AuditEvent {
        AuditEvent::new("auth.login.success", EventStatus::Success)
            .with_timestamp(
                DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            )
            .with_principal("u1")
    }

    #[test]
    fn test_hash_is_lowercase_hex_sha256() {
        let hash = hash_event(&fixed_event()).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_event(&fixed_event()).unwrap(), hash_event(&fixed_event()).unwrap());
    }

    #[test]
    fn test_detail_key_order_does_not_change_hash() {
        let mut a = fixed_event();
        a.details = Some(json!({"first": 1, "second": {"x": true, "y": false}}));

        // Build the same logical object with reversed insertion order.
        let mut inner = serde_json::Map::new();
        inner.insert("y".to_string(), json!(false));
        inner.insert("x".to_string(), json!(true));
        let mut outer = serde_json::Map::new();
        outer.insert("second".to_string(), serde_json::Value::Object(inner));
        outer.insert("first".to_string(), json!(1));
        let mut b = fixed_event();
        b.details = Some(serde_json::Value::Object(outer));

        assert_eq!(hash_event(&a).unwrap(), hash_event(&b).unwrap());
    }

    #[test]
    fn test_field_change_changes_hash() {
        let a = fixed_event();
        let b = fixed_event().with_outcome("interactive login");
        assert_ne!(hash_event(&a).unwrap(), hash_event(&b).unwrap());
    }

    #[test]
    fn test_hash_ignores_post_write_columns() {
        let mut a = fixed_event();
        let mut b = fixed_event();
        b.id = Some(99);
        b.processing_latency_ms = Some(5);
        b.archived_at = Some(Utc::now());
        a.hash = None;
        assert_eq!(hash_event(&a).unwrap(), hash_event(&b).unwrap());
    }

    #[test]
    fn test_verify_ok_after_seal() {
        let mut event = fixed_event();
        seal_event(&mut event).unwrap();
        assert_eq!(verify_event(&event).unwrap(), VerificationStatus::Ok);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let mut event = fixed_event();
        seal_event(&mut event).unwrap();
        event.outcome_description = Some("rewritten after the fact".to_string());

        match verify_event(&event).unwrap() {
            VerificationStatus::Mismatch { expected, observed } => {
                assert_ne!(expected, observed);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_missing_hash() {
        let event = fixed_event();
        assert_eq!(
            verify_event(&event).unwrap(),
            VerificationStatus::MissingHash
        );
    }

    #[test]
    fn test_hash_requires_action() {
        let event = AuditEvent::new("", EventStatus::Success);
        assert!(hash_event(&event).is_err());
    }
}

use chrono::SecondsFormat;
use serde_json::{Map, Value};

use crate::event::AuditEvent;

/// Produce the canonical UTF-8 byte string of a JSON value.
///
/// Object keys are emitted in lexicographic order at every nesting level,
/// arrays keep insertion order, strings are JSON-escaped, numbers use
/// serde_json's shortest round-trip rendering, and null is the literal
/// `null`. No whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json escapes exactly per RFC 8259.
            out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialization is infallible"));
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// Build the canonical value of an audit event.
///
/// Excluded: `hash`, `archivedAt`, and the post-write audit columns `id` and
/// `processingLatencyMs`. Absent optional fields are emitted as `null` so
/// that absence itself is part of the canonical form. Timestamps are fixed to
/// RFC-3339 with millisecond precision and a `Z` suffix.
pub fn canonical_event_value(event: &AuditEvent) -> Value {
    let mut map = Map::new();

    map.insert(
        "timestamp".to_string(),
        Value::String(event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    map.insert("principalId".to_string(), opt_string(&event.principal_id));
    map.insert(
        "organizationId".to_string(),
        opt_string(&event.organization_id),
    );
    map.insert("action".to_string(), Value::String(event.action.clone()));
    map.insert(
        "status".to_string(),
        Value::String(event.status.as_str().to_string()),
    );
    map.insert(
        "targetResourceType".to_string(),
        opt_string(&event.target_resource_type),
    );
    map.insert(
        "targetResourceId".to_string(),
        opt_string(&event.target_resource_id),
    );
    map.insert(
        "outcomeDescription".to_string(),
        opt_string(&event.outcome_description),
    );
    map.insert(
        "dataClassification".to_string(),
        Value::String(event.data_classification.as_str().to_string()),
    );
    map.insert(
        "retentionPolicy".to_string(),
        Value::String(event.retention_policy.clone()),
    );
    map.insert(
        "correlationId".to_string(),
        opt_string(&event.correlation_id),
    );

    let session = match &event.session_context {
        Some(ctx) => {
            let mut session = Map::new();
            session.insert("sessionId".to_string(), opt_string(&ctx.session_id));
            session.insert("ipAddress".to_string(), opt_string(&ctx.ip_address));
            session.insert("userAgent".to_string(), opt_string(&ctx.user_agent));
            Value::Object(session)
        }
        None => Value::Null,
    };
    map.insert("sessionContext".to_string(), session);

    map.insert(
        "details".to_string(),
        event.details.clone().unwrap_or(Value::Null),
    );
    map.insert(
        "hashAlgorithm".to_string(),
        Value::String(event.hash_algorithm.clone()),
    );
    map.insert(
        "eventVersion".to_string(),
        Value::String(event.event_version.clone()),
    );

    Value::Object(map)
}

fn opt_string(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::{AuditEvent, EventStatus};

    #[test]
    fn test_object_keys_sorted() {
        let value = json!({"zeta": 1, "alpha": {"nested_z": true, "nested_a": null}});
        assert_eq!(
            canonical_json(&value),
            r#"{"alpha":{"nested_a":null,"nested_z":true},"zeta":1}"#
        );
    }

    #[test]
    fn test_arrays_keep_insertion_order() {
        let value = json!({"items": [3, 1, 2]});
        assert_eq!(canonical_json(&value), r#"{"items":[3,1,2]}"#);
    }

    #[test]
    fn test_string_escaping() {
        let value = json!({"message": "line1\nline2 \"quoted\""});
        assert_eq!(
            canonical_json(&value),
            r#"{"message":"line1\nline2 \"quoted\""}"#
        );
    }

    #[test]
    fn test_numbers_shortest_roundtrip() {
        let value = json!({"ratio": 0.1, "count": 42});
        assert_eq!(canonical_json(&value), r#"{"count":42,"ratio":0.1}"#);
    }

    #[test]
    fn test_absent_fields_emitted_as_null() {
        let event = AuditEvent::new("auth.login.success", EventStatus::Success);
        let value = canonical_event_value(&event);
        assert_eq!(value["principalId"], serde_json::Value::Null);
        assert_eq!(value["sessionContext"], serde_json::Value::Null);
        assert_eq!(value["details"], serde_json::Value::Null);
    }

    #[test]
    fn test_excluded_fields_absent() {
        let mut event = AuditEvent::new("auth.login.success", EventStatus::Success);
        event.id = Some(7);
        event.hash = Some("deadbeef".to_string());
        event.processing_latency_ms = Some(12);

        let value = canonical_event_value(&event);
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("id"));
        assert!(!obj.contains_key("hash"));
        assert!(!obj.contains_key("archivedAt"));
        assert!(!obj.contains_key("processingLatencyMs"));
    }

    #[test]
    fn test_timestamp_millisecond_precision() {
        let event = AuditEvent::new("a.b", EventStatus::Success).with_timestamp(
            chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        );
        let value = canonical_event_value(&event);
        assert_eq!(value["timestamp"], "2024-01-01T00:00:00.000Z");
    }
}

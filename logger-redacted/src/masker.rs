use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref CREDIT_CARD_REGEX: Regex =
        Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b").unwrap();
    static ref SSN_REGEX: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b").unwrap();
    static ref PHONE_REGEX: Regex =
        Regex::new(r"\b(?:\+1[-.\s]?)?\(?([0-9]{3})\)?[-.\s]?([0-9]{3})[-.\s]?([0-9]{4})\b")
            .unwrap();
    static ref BEARER_REGEX: Regex = Regex::new(r"Bearer\s+[A-Za-z0-9._\-+/=]+").unwrap();
    static ref BASIC_REGEX: Regex = Regex::new(r"Basic\s+[A-Za-z0-9+/=]+").unwrap();
}

/// Longest run of mask characters emitted for a single value.
const MAX_MASK_LENGTH: usize = 20;

/// Field names whose values are always masked, matched case-insensitively as
/// substrings of the key.
const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "apikey",
    "api_key",
    "authorization",
    "cookie",
    "session",
    "secret",
    "ssn",
    "credit",
    "cvv",
    "pin",
    "email",
    "phone",
];

/// Masks sensitive field values and string patterns before logging.
#[derive(Debug, Clone)]
pub struct DataMasker {
    sensitive_fields: Vec<String>,
}

impl Default for DataMasker {
    fn default() -> Self {
        Self {
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DataMasker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensitive_field(mut self, field: impl Into<String>) -> Self {
        self.sensitive_fields.push(field.into().to_ascii_lowercase());
        self
    }

    /// Whether a field name is on the sensitive list.
    pub fn is_sensitive_field(&self, field: &str) -> bool {
        let lower = field.to_ascii_lowercase();
        self.sensitive_fields.iter().any(|f| lower.contains(f))
    }

    /// Mask pattern matches inside free-form text.
    pub fn mask_text(&self, text: &str) -> String {
        let mut result = text.to_string();
        for regex in [
            &*CREDIT_CARD_REGEX,
            &*SSN_REGEX,
            &*EMAIL_REGEX,
            &*PHONE_REGEX,
            &*BEARER_REGEX,
            &*BASIC_REGEX,
        ] {
            result = regex
                .replace_all(&result, |caps: &regex::Captures| mask_value(&caps[0]))
                .to_string();
        }
        result
    }

    /// Recursively mask a JSON value: sensitive keys lose their values,
    /// remaining strings are pattern-scanned.
    pub fn mask_json(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let masked = map
                    .iter()
                    .map(|(key, val)| {
                        let masked_val = if self.is_sensitive_field(key) {
                            Value::String(mask_value(&value_preview(val)))
                        } else {
                            self.mask_json(val)
                        };
                        (key.clone(), masked_val)
                    })
                    .collect();
                Value::Object(masked)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.mask_json(v)).collect()),
            Value::String(s) => Value::String(self.mask_text(s)),
            other => other.clone(),
        }
    }
}

/// A `*` run no longer than the original value and capped at 20.
fn mask_value(original: &str) -> String {
    "*".repeat(original.chars().count().clamp(1, MAX_MASK_LENGTH))
}

fn value_preview(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

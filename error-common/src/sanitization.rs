use std::collections::HashMap;

/// Field names whose values must never appear in error metadata.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "cookie",
    "session",
    "secret",
    "encryption_key",
    "ssn",
];

/// Build a safe-to-log metadata map, redacting sensitive keys.
///
/// Errors crossing a component boundary carry this map instead of raw
/// payload fragments.
pub fn safe_metadata<I, K, V>(entries: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    entries
        .into_iter()
        .map(|(k, v)| {
            let key: String = k.into();
            let value = if is_sensitive_key(&key) {
                "***REDACTED***".to_string()
            } else {
                v.into()
            };
            (key, value)
        })
        .collect()
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_keys_redacted() {
        let meta = safe_metadata([("password", "hunter2"), ("endpoint", "https://example")]);
        assert_eq!(meta.get("password").map(String::as_str), Some("***REDACTED***"));
        assert_eq!(meta.get("endpoint").map(String::as_str), Some("https://example"));
    }

    #[test]
    fn test_case_insensitive_match() {
        let meta = safe_metadata([("apiKey", "abc"), ("Authorization", "Bearer xyz")]);
        assert!(meta.values().all(|v| v == "***REDACTED***"));
    }
}

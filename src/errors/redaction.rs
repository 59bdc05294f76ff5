//! Sensitive-data redaction
//!
//! Every error context serialized outward is scrubbed here. Redaction works
//! both by key (a credential-shaped key hides its whole value) and by value
//! (a string that looks like a JWT, bearer token, or long hex/base64 secret
//! is hidden wherever it appears), recursively through nested maps and
//! arrays.

use regex::Regex;
use std::sync::LazyLock;

use super::ErrorContext;

/// Replacement literal for scrubbed values
pub const REDACTED: &str = "[REDACTED]";

static SENSITIVE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)password|passwd|secret|token|api[_-]?key|credential|authorization|bearer|private[_-]?key|ssh[_-]?key|access[_-]?token|refresh[_-]?token|session[_-]?id|cookie|auth[_-]?code|auth[_-]?header|client[_-]?secret",
    )
    .expect("sensitive-key pattern is valid")
});

static SENSITIVE_VALUES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // JWT: three dot-separated base64url segments
        r"^[A-Za-z0-9_-]{4,}\.[A-Za-z0-9_-]{4,}\.[A-Za-z0-9_-]{4,}$",
        // Bearer scheme with any token
        r"(?i)^bearer\s+\S+$",
        // Long hex blobs (keys, digests)
        r"^[0-9a-fA-F]{32,}$",
        // Long base64 blobs
        r"^[A-Za-z0-9+/]{40,}={0,2}$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("sensitive-value pattern is valid"))
    .collect()
});

fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEY.is_match(key)
}

fn is_sensitive_value(value: &str) -> bool {
    SENSITIVE_VALUES.iter().any(|re| re.is_match(value))
}

/// Scrubs a JSON value in place.
pub fn redact_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => redact_map(map),
        serde_json::Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        }
        serde_json::Value::String(s) => {
            if is_sensitive_value(s) {
                *s = REDACTED.to_string();
            }
        }
        _ => {}
    }
}

/// Scrubs a context map in place.
pub fn redact_map(map: &mut ErrorContext) {
    for (key, value) in map.iter_mut() {
        if is_sensitive_key(key) {
            *value = serde_json::Value::String(REDACTED.to_string());
        } else {
            redact_value(value);
        }
    }
}

/// Returns a scrubbed copy of a context map.
pub fn redacted_copy(map: &ErrorContext) -> ErrorContext {
    let mut copy = map.clone();
    redact_map(&mut copy);
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> ErrorContext {
        value.as_object().expect("object literal").clone()
    }

    #[test]
    fn credential_keys_are_scrubbed() {
        let mut map = ctx(json!({
            "password": "hunter2",
            "api_key": "abc",
            "apiKey": "abc",
            "x-api-key": "abc",
            "refresh_token": "abc",
            "host": "192.168.88.1",
        }));

        redact_map(&mut map);

        assert_eq!(map["password"], REDACTED);
        assert_eq!(map["api_key"], REDACTED);
        assert_eq!(map["apiKey"], REDACTED);
        assert_eq!(map["x-api-key"], REDACTED);
        assert_eq!(map["refresh_token"], REDACTED);
        assert_eq!(map["host"], "192.168.88.1");
    }

    #[test]
    fn sensitive_values_are_scrubbed_under_benign_keys() {
        let mut map = ctx(json!({
            "header": "Bearer eyJabc.def_123",
            "jwt": "eyJhbGciOi.eyJzdWIiOi.SflKxwRJSM",
            "digest": "deadbeefdeadbeefdeadbeefdeadbeef",
            "note": "plain text stays",
        }));

        redact_map(&mut map);

        assert_eq!(map["header"], REDACTED);
        assert_eq!(map["jwt"], REDACTED);
        assert_eq!(map["digest"], REDACTED);
        assert_eq!(map["note"], "plain text stays");
    }

    #[test]
    fn redaction_recurses_into_nested_structures() {
        let mut map = ctx(json!({
            "request": {
                "credentials": {"password": "p"},
                "hosts": ["10.0.0.1", "Bearer tok"],
            },
        }));

        redact_map(&mut map);

        assert_eq!(map["request"]["credentials"]["password"], REDACTED);
        assert_eq!(map["request"]["hosts"][0], "10.0.0.1");
        assert_eq!(map["request"]["hosts"][1], REDACTED);
    }

    #[test]
    fn numbers_and_bools_pass_through() {
        let mut map = ctx(json!({"port": 8728, "enabled": true}));
        redact_map(&mut map);
        assert_eq!(map["port"], 8728);
        assert_eq!(map["enabled"], true);
    }

    proptest! {
        #[test]
        fn redaction_is_idempotent(keys in proptest::collection::vec("[a-zA-Z_-]{1,20}", 0..8),
                                   values in proptest::collection::vec(".{0,60}", 0..8)) {
            let mut map = ErrorContext::new();
            for (k, v) in keys.iter().zip(values.iter()) {
                map.insert(k.clone(), serde_json::Value::String(v.clone()));
            }

            let mut once = map.clone();
            redact_map(&mut once);
            let mut twice = once.clone();
            redact_map(&mut twice);

            prop_assert_eq!(once, twice);
        }
    }
}

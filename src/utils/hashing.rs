//! Trait hashing
//!
//! When `Configuration::hash_traits` is on, top-level string traits are
//! replaced by the hex SHA-256 of their trimmed, lowercased value before they
//! reach the state store or any event.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hash every top-level string value of a traits object
///
/// Non-object values and non-string fields are returned untouched.
pub fn hash_traits(traits: Value) -> Value {
    match traits {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| match value {
                    Value::String(s) => (key, Value::String(sha256_hex(&s))),
                    other => (key, other),
                })
                .collect(),
        ),
        other => other,
    }
}

fn sha256_hex(value: &str) -> String {
    let normalized = value.trim().to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hashes_string_traits_only() {
        let hashed = hash_traits(json!({"email": "Ben@Med.com ", "age": 41}));

        assert_eq!(hashed["age"], 41);
        // sha256("ben@med.com")
        assert_eq!(hashed["email"], json!(sha256_hex("ben@med.com")));
        assert_eq!(hashed["email"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_non_object_untouched() {
        assert_eq!(hash_traits(json!("plain")), json!("plain"));
    }
}

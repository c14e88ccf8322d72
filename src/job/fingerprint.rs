//! Fingerprinting: a stable hash over `(tool_name, canonical(parameters))`, used
//! by the Job Registry (C6) to deduplicate concurrent submissions of the same
//! logical work. Canonicalization recursively sorts object keys so that
//! `{"a":1,"b":2}` and `{"b":2,"a":1}` fingerprint identically.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub type Fingerprint = String;

/// Recursively rewrites a `Value` so that every object's keys are in sorted
/// order (`serde_json`'s default map is already a `BTreeMap` under the
/// `preserve_order` feature being off, but we do this explicitly so the
/// behavior doesn't depend on which cargo features happen to be enabled
/// downstream).
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Computes the fingerprint for a tool invocation.
pub fn compute(tool_name: &str, parameters: &Value) -> Fingerprint {
    let canonical = canonicalize(parameters);
    let canonical_json =
        serde_json::to_string(&canonical).expect("canonicalized JSON always serializes");

    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_json.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let a = compute("search", &json!({"a": 1, "b": [2, 3]}));
        let b = compute("search", &json!({"b": [2, 3], "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn different_tool_names_differ() {
        let a = compute("search", &json!({}));
        let b = compute("decompose", &json!({}));
        assert_ne!(a, b);
    }

    #[test]
    fn nested_object_key_order_does_not_affect_fingerprint() {
        let a = compute("x", &json!({"outer": {"z": 1, "y": 2}}));
        let b = compute("x", &json!({"outer": {"y": 2, "z": 1}}));
        assert_eq!(a, b);
    }

    #[test]
    fn different_values_differ() {
        let a = compute("x", &json!({"a": 1}));
        let b = compute("x", &json!({"a": 2}));
        assert_ne!(a, b);
    }
}

//! Canonical serialization and the record hash domain.
//!
//! The hash domain of a record is the canonical JSON of
//! `{"data", "prev_hash", "session_id", "type"}`. The timestamp is not part of it.
//! Builder and verifier both go through [`record_hash`], so the domain is defined
//! in exactly one place.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministically stringify a JSON value with sorted keys recursively.
///
/// Objects have their keys sorted; arrays keep their order. Output is compact.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            // Scalars serialize infallibly.
            out.push_str(&value.to_string());
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
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// Lowercase hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Computes the hash of a record from its hash-domain fields.
///
/// `data` is the raw payload value, so the verifier can hash exactly what is on
/// disk without round-tripping through typed payloads.
pub fn record_hash(record_type: &str, session_id: &str, data: &Value, prev_hash: &str) -> String {
    let domain = serde_json::json!({
        "type": record_type,
        "session_id": session_id,
        "data": data,
        "prev_hash": prev_hash,
    });
    sha256_hex(canonical_json(&domain).as_bytes())
}

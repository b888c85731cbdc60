//! Content hashing for inventory change detection.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Keys that change on every collection and must not affect the hash.
pub const VOLATILE_KEYS: &[&str] = &["collected_at"];

/// Canonical JSON text: object keys sorted, no insignificant whitespace.
///
/// Keys are sorted here rather than relying on `serde_json::Map` ordering,
/// which follows insertion order once `preserve_order` is enabled anywhere
/// in the build.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lowercase hex SHA-256 of the canonical form. `null` hashes to the empty
/// string.
pub fn sha256_of(value: &Value) -> String {
    if value.is_null() {
        return String::new();
    }
    let digest = Sha256::digest(canonical_json(value).as_bytes());
    hex::encode(digest)
}

/// Hash of an inventory document with the volatile top-level keys removed.
pub fn inventory_hash(inventory: &Value) -> String {
    match inventory {
        Value::Object(map) => {
            let mut stable = map.clone();
            for key in VOLATILE_KEYS {
                stable.remove(*key);
            }
            sha256_of(&Value::Object(stable))
        }
        other => sha256_of(other),
    }
}

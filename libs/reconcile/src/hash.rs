//! Deterministic hashing of JSON documents.

use sha2::{Digest, Sha256};

/// A spec hash for deterministic comparison.
///
/// Used to detect changes in parameters the external API never echoes back.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let mut canonical = String::new();
        write_canonical(json, &mut canonical);
        let digest = Sha256::digest(canonical.as_bytes());
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sorted keys, no whitespace, nulls dropped from objects.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_hash_ignores_key_order() {
        let a = serde_json::json!({"b": 2, "a": {"y": [1, 2], "x": "s"}});
        let b = serde_json::json!({"a": {"x": "s", "y": [1, 2]}, "b": 2});

        assert_eq!(SpecHash::from_json(&a), SpecHash::from_json(&b));
    }

    #[test]
    fn test_spec_hash_treats_null_as_absent() {
        let a = serde_json::json!({"keys": null, "size": 29});
        let b = serde_json::json!({"size": 29});

        assert_eq!(SpecHash::from_json(&a), SpecHash::from_json(&b));
    }

    #[test]
    fn test_spec_hash_detects_array_order() {
        let a = serde_json::json!({"keys": ["k1", "k2"]});
        let b = serde_json::json!({"keys": ["k2", "k1"]});

        assert_ne!(SpecHash::from_json(&a), SpecHash::from_json(&b));
        assert!(SpecHash::from_json(&a).as_str().starts_with("sha256:"));
    }
}

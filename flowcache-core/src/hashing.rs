//! Node hashing helper for executors.
//!
//! The cache compares hashes but never computes them. Executors that do not
//! have their own scheme can use [`node_hash`] to derive a stable own hash
//! from a node's type and configuration.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a node's type and configuration.
///
/// The configuration is hashed in canonical JSON form: `serde_json::Value`
/// objects keep keys sorted, so key order in the source document does not
/// change the hash.
pub fn node_hash(node_type: &str, config: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(node_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(config.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"url":"https://api.example.com","method":"GET"}"#)
                .expect("parse should succeed");
        let b: serde_json::Value =
            serde_json::from_str(r#"{"method":"GET","url":"https://api.example.com"}"#)
                .expect("parse should succeed");
        assert_eq!(node_hash("http", &a), node_hash("http", &b));
    }

    #[test]
    fn test_type_and_config_both_count() {
        let config = json!({"sheet": "Q1"});
        assert_ne!(node_hash("sheets", &config), node_hash("sql", &config));
        assert_ne!(
            node_hash("sheets", &config),
            node_hash("sheets", &json!({"sheet": "Q2"}))
        );
        assert_eq!(node_hash("sheets", &config).len(), 64);
    }
}

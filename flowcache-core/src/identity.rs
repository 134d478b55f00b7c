//! Identity types for cache slots.
//!
//! Flow and node identifiers are opaque to the cache. They are compared
//! byte-for-byte and never parsed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identifier supplied by the executor.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Raw bytes, used for storage key encoding.
            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// Identifier of a flow (a user-authored graph).
    FlowId
);

opaque_id!(
    /// Identifier of a node within a flow.
    NodeId
);

/// Content hashes of upstream nodes, keyed by upstream node id.
///
/// A `BTreeMap` keeps the serialized form deterministic.
pub type UpstreamHashes = BTreeMap<NodeId, String>;

/// Composite key of a cache slot.
///
/// There is at most one live entry per key in each tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub flow_id: FlowId,
    pub node_id: NodeId,
}

impl CacheKey {
    pub fn new(flow_id: impl Into<FlowId>, node_id: impl Into<NodeId>) -> Self {
        Self {
            flow_id: flow_id.into(),
            node_id: node_id.into(),
        }
    }

    /// Whether this key belongs to the given flow.
    pub fn belongs_to(&self, flow_id: &FlowId) -> bool {
        &self.flow_id == flow_id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flow_id, self.node_id)
    }
}

/// Build an [`UpstreamHashes`] map from `(node, hash)` pairs.
pub fn upstream_hashes<I, N, H>(pairs: I) -> UpstreamHashes
where
    I: IntoIterator<Item = (N, H)>,
    N: Into<NodeId>,
    H: Into<String>,
{
    pairs
        .into_iter()
        .map(|(node, hash)| (node.into(), hash.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_display() {
        let key = CacheKey::new("flow-1", "node-a");
        assert_eq!(key.to_string(), "flow-1/node-a");
    }

    #[test]
    fn test_belongs_to() {
        let key = CacheKey::new("f1", "a");
        assert!(key.belongs_to(&FlowId::from("f1")));
        assert!(!key.belongs_to(&FlowId::from("f2")));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&NodeId::new("n-7")).expect("serialize should succeed");
        assert_eq!(json, "\"n-7\"");

        let hashes = upstream_hashes([("b", "hb"), ("a", "ha")]);
        let json = serde_json::to_string(&hashes).expect("serialize should succeed");
        assert_eq!(json, r#"{"a":"ha","b":"hb"}"#);
    }
}

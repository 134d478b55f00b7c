//! Composite key encoding for ordered key-value stores.
//!
//! # Binary Format
//!
//! - Bytes 0-3: flow id length (u32, big endian)
//! - Next `len` bytes: flow id
//! - Remaining bytes: node id
//!
//! The length prefix makes [`flow_prefix`] match exactly one flow: no flow
//! id can be a prefix of another flow's encoded keys.

use flowcache_core::{CacheKey, FlowId, NodeId};

const LEN_BYTES: usize = 4;

/// Prefix shared by every key of a flow.
pub fn flow_prefix(flow_id: &FlowId) -> Vec<u8> {
    let flow = flow_id.as_bytes();
    let mut prefix = Vec::with_capacity(LEN_BYTES + flow.len());
    prefix.extend_from_slice(&(flow.len() as u32).to_be_bytes());
    prefix.extend_from_slice(flow);
    prefix
}

/// Encode a cache key.
pub fn encode_key(key: &CacheKey) -> Vec<u8> {
    let mut bytes = flow_prefix(&key.flow_id);
    bytes.extend_from_slice(key.node_id.as_bytes());
    bytes
}

/// Decode a key produced by [`encode_key`].
///
/// Returns `None` if the buffer is truncated or either id is not UTF-8.
pub fn decode_key(bytes: &[u8]) -> Option<CacheKey> {
    let len_bytes: [u8; LEN_BYTES] = bytes.get(..LEN_BYTES)?.try_into().ok()?;
    let flow_len = u32::from_be_bytes(len_bytes) as usize;
    let flow_end = LEN_BYTES.checked_add(flow_len)?;

    let flow = std::str::from_utf8(bytes.get(LEN_BYTES..flow_end)?).ok()?;
    let node = std::str::from_utf8(bytes.get(flow_end..)?).ok()?;

    Some(CacheKey {
        flow_id: FlowId::new(flow),
        node_id: NodeId::new(node),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let key = CacheKey::new("flow-1", "node/a");
        assert_eq!(decode_key(&encode_key(&key)), Some(key));
    }

    #[test]
    fn test_prefix_does_not_leak_into_longer_flow_ids() {
        let short = encode_key(&CacheKey::new("f1", "x"));
        let long = encode_key(&CacheKey::new("f12", "x"));
        let prefix = flow_prefix(&FlowId::new("f1"));

        assert!(short.starts_with(&prefix));
        assert!(!long.starts_with(&prefix));
    }

    #[test]
    fn test_empty_ids() {
        let key = CacheKey::new("", "");
        assert_eq!(encode_key(&key), vec![0, 0, 0, 0]);
        assert_eq!(decode_key(&[0, 0, 0, 0]), Some(key));
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(decode_key(&[0, 0]), None);
        assert_eq!(decode_key(&[0, 0, 0, 9, b'a']), None);
    }
}

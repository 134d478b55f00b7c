//! Validity rule shared by both tiers.
//!
//! An entry is valid for an expectation when its own hash matches and no
//! upstream hash the caller expects contradicts the stored one. Only keys
//! present on both sides are compared: upstream keys that were stored but
//! are no longer expected are not checked (pruning an edge does not
//! invalidate the entry), and expected keys the entry never recorded are
//! skipped as well.

use crate::entry::Provenance;
use crate::identity::UpstreamHashes;

/// Decide whether a stored entry may be served for the given expectation.
///
/// Fails only on an own-hash mismatch or on an upstream key whose stored
/// hash differs from the expected one.
pub fn is_valid(
    stored: &Provenance,
    expected_hash: &str,
    expected_upstream_hashes: &UpstreamHashes,
) -> bool {
    if stored.own_hash != expected_hash {
        return false;
    }

    expected_upstream_hashes
        .iter()
        .all(|(node_id, expected)| {
            stored
                .upstream_hashes
                .get(node_id)
                .map_or(true, |hash| hash == expected)
        })
}

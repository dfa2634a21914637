//! Distance and identifier primitives.
//!
//! Thin re-exports over [`crisscross_crypto::sha3`], plus the `Address` type
//! and the bucket-index clamp that the routing table needs on top of the raw
//! common-prefix-length metric.

use std::net::SocketAddr;

use crisscross_crypto::sha3;

use crate::ID_LEN;

/// A 256-bit node identifier, in either raw or hashed form.
pub type NodeId = [u8; ID_LEN];

/// An IP + UDP port pair.
pub type Address = SocketAddr;

/// Generate a fresh `(raw, hashed)` node id pair.
pub fn gen_node_id() -> (NodeId, NodeId) {
    sha3::gen_node_id()
}

/// Hash a raw id into its distance-metric form: `SHA3-256(raw)`.
pub fn hash_id(raw: &NodeId) -> NodeId {
    sha3::hash(raw)
}

/// Bitwise XOR of two ids.
pub fn xor(a: &NodeId, b: &NodeId) -> NodeId {
    sha3::xor(a, b)
}

/// Order `a` and `b` by ascending XOR distance to `target`.
pub fn xor_cmp(a: &NodeId, b: &NodeId, target: &NodeId) -> std::cmp::Ordering {
    sha3::xor_cmp(a, b, target)
}

/// The bucket index a node with hashed id `other` belongs in, relative to
/// `self_hashed`, clamped to `last_bucket_index`.
///
/// Returns `None` when `other == self_hashed`.
pub fn bucket_index(self_hashed: &NodeId, other: &NodeId, last_bucket_index: usize) -> Option<usize> {
    let prefix_len = sha3::common_prefix_len(self_hashed, other);
    if prefix_len >= crate::ID_BITS {
        return None;
    }
    Some(prefix_len.min(last_bucket_index))
}

/// Generate a random id sharing exactly `prefix_len` leading bits with
/// `self_hashed`.
pub fn gen_id_in_bucket(prefix_len: usize, self_hashed: &NodeId) -> NodeId {
    sha3::gen_id_in_bucket(prefix_len, self_hashed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index_identical_ids_is_none() {
        let id = [0x11u8; ID_LEN];
        assert_eq!(bucket_index(&id, &id, 255), None);
    }

    #[test]
    fn test_bucket_index_clamped_to_last_bucket() {
        let self_id = [0u8; ID_LEN];
        let mut other = [0u8; ID_LEN];
        other[31] = 0x01; // common_prefix_len = 255
        assert_eq!(bucket_index(&self_id, &other, 3), Some(3));
    }

    #[test]
    fn test_bucket_index_uncapped_when_below_cap() {
        let self_id = [0u8; ID_LEN];
        let mut other = [0u8; ID_LEN];
        other[0] = 0x80; // common_prefix_len = 0
        assert_eq!(bucket_index(&self_id, &other, 255), Some(0));
    }
}

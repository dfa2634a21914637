//! Node-id hashing and XOR-distance helpers.
//!
//! The routing table keys exclusively on the SHA3-256 hash of a peer's
//! raw, user-supplied identifier — never on the raw bytes themselves. This
//! resists an adversary picking a raw id to land at a chosen point in the
//! keyspace.

use ::sha3::{Digest, Sha3_256};

/// Width of a node id, in bytes (256 bits).
pub const ID_LEN: usize = 32;

/// Hash a raw node id (or any 32-byte-keyed value) into its distance-metric form.
///
/// `hashed_id = SHA3-256(raw_id)`.
pub fn hash(raw: &[u8]) -> [u8; ID_LEN] {
    let mut hasher = Sha3_256::new();
    hasher.update(raw);
    let digest = hasher.finalize();
    let mut out = [0u8; ID_LEN];
    out.copy_from_slice(&digest);
    out
}

/// Bitwise XOR of two equal-length ids. Defines the Kademlia distance metric.
pub fn xor(a: &[u8; ID_LEN], b: &[u8; ID_LEN]) -> [u8; ID_LEN] {
    let mut out = [0u8; ID_LEN];
    for i in 0..ID_LEN {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Number of leading bits that are equal between `a` and `b` (i.e. the length
/// of their shared prefix). Returns `8 * ID_LEN` when `a == b`.
pub fn common_prefix_len(a: &[u8; ID_LEN], b: &[u8; ID_LEN]) -> usize {
    let distance = xor(a, b);
    for (i, byte) in distance.iter().enumerate() {
        if *byte != 0 {
            return i * 8 + byte.leading_zeros() as usize;
        }
    }
    8 * ID_LEN
}

/// Order `a` and `b` by ascending XOR distance to `target`, breaking exact
/// ties by lexicographic byte order.
pub fn xor_cmp(
    a: &[u8; ID_LEN],
    b: &[u8; ID_LEN],
    target: &[u8; ID_LEN],
) -> std::cmp::Ordering {
    let da = xor(a, target);
    let db = xor(b, target);
    da.cmp(&db).then_with(|| a.cmp(b))
}

/// Generate 32 bytes of cryptographic randomness and hash them: a fresh,
/// uniformly distributed node id for the local peer.
pub fn gen_node_id() -> ([u8; ID_LEN], [u8; ID_LEN]) {
    use rand::RngCore;
    let mut raw = [0u8; ID_LEN];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    let hashed = hash(&raw);
    (raw, hashed)
}

/// Generate a raw id whose hash shares exactly `prefix_len` leading bits with
/// `self_hashed`. Used to target bucket refreshes and random maintenance
/// lookups.
///
/// The returned id is itself unhashed; callers that need to compare it in
/// XOR space should hash it first, same as any other candidate id. Since an
/// arbitrary raw id hashes to an effectively random point, we instead build
/// the target directly in hashed space: this function returns a value
/// already in the hashed id's domain, for use as a lookup target.
pub fn gen_id_in_bucket(prefix_len: usize, self_hashed: &[u8; ID_LEN]) -> [u8; ID_LEN] {
    use rand::RngCore;
    let mut target = *self_hashed;
    if prefix_len >= 8 * ID_LEN {
        // Identical to self; no bit may differ.
        return target;
    }
    let byte_idx = prefix_len / 8;
    let bit_idx = prefix_len % 8;

    // Flip the first bit after the shared prefix so the common-prefix length
    // is exactly `prefix_len`.
    target[byte_idx] ^= 0x80 >> bit_idx;

    // Randomize all bits after that one.
    let mut rng = rand::rngs::OsRng;
    let tail_byte_mask = 0xFFu8 >> (bit_idx + 1);
    let mut rand_tail = [0u8; ID_LEN];
    rng.fill_bytes(&mut rand_tail);
    target[byte_idx] = (target[byte_idx] & !tail_byte_mask) | (rand_tail[byte_idx] & tail_byte_mask);
    for i in (byte_idx + 1)..ID_LEN {
        target[i] = rand_tail[i];
    }
    target
}

//! General-purpose BLAKE3 hashing and keyed MAC.
//!
//! Used outside the wire-format-critical paths (which pin SHA3-256 and
//! AES-256-GCM specifically, see [`crate::sha3`] and [`crate::aes_gcm`]) —
//! chiefly for minting and validating lookup tokens.

/// Compute the BLAKE3 hash of the input data.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *::blake3::hash(data).as_bytes()
}

/// Derive a 32-byte key from `key_material` under a fixed context string.
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    *hasher.finalize().as_bytes()
}

/// Compute a keyed BLAKE3 hash (MAC/PRF). `key` is typically produced by
/// [`derive_key`].
pub fn keyed_hash(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    *::blake3::keyed_hash(key, message).as_bytes()
}

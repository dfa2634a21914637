//! AES-256-GCM sealing for the cluster envelope.
//!
//! Every datagram exchanged within a cluster is sealed under that cluster's
//! symmetric secret. The envelope's associated data is the fixed string
//! `"AES256GCM"`, and the nonce travels alongside the ciphertext as the
//! wire's `iv` field (32 bytes on the wire; only the first 12 are the actual
//! GCM nonce, the rest is random padding carried to fill the fixed 32-byte
//! `iv` field width the wire format requires.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};

use crate::{CryptoError, Result};

/// Key size for AES-256-GCM (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// On-wire IV field width. Only the leading [`GCM_NONCE_SIZE`]
/// bytes are used as the actual AES-GCM nonce.
pub const IV_FIELD_SIZE: usize = 32;

/// Actual AES-GCM nonce size (96 bits = 12 bytes).
pub const GCM_NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// Associated data bound to every cluster envelope.
pub const AAD: &[u8] = b"AES256GCM";

/// Seal `plaintext` under `key`, generating a fresh random IV.
///
/// Returns `iv(32) || tag(16) || ciphertext`, the wire framing for the
/// sealed body.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    use rand::RngCore;
    let mut iv = [0u8; IV_FIELD_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    seal_with_iv(key, &iv, plaintext).map(|(_, body)| {
        let mut out = Vec::with_capacity(IV_FIELD_SIZE + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        out
    })
}

/// Seal `plaintext` under `key` using a caller-supplied 32-byte IV field,
/// returning `(iv, tag || ciphertext)`. Exposed for deterministic tests.
fn seal_with_iv(
    key: &[u8; KEY_SIZE],
    iv: &[u8; IV_FIELD_SIZE],
    plaintext: &[u8],
) -> Result<([u8; IV_FIELD_SIZE], Vec<u8>)> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&iv[..GCM_NONCE_SIZE]);

    let sealed = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: AAD,
            },
        )
        .map_err(|_| CryptoError::AeadDecryption)?;

    // `aes-gcm` appends the tag after the ciphertext; the wire format wants
    // the tag to precede the ciphertext, so re-pack.
    let (ct, tag) = sealed.split_at(sealed.len() - TAG_SIZE);
    let mut body = Vec::with_capacity(sealed.len());
    body.extend_from_slice(tag);
    body.extend_from_slice(ct);
    Ok((*iv, body))
}

/// Open a sealed envelope body of the form `iv(32) || tag(16) || ciphertext`.
///
/// Returns `Err` (never panics) on any authentication failure — callers
/// treat that as a silent drop.
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < IV_FIELD_SIZE + TAG_SIZE {
        return Err(CryptoError::InvalidInput("sealed body too short".into()));
    }
    let (iv, rest) = sealed.split_at(IV_FIELD_SIZE);
    let (tag, ciphertext) = rest.split_at(TAG_SIZE);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&iv[..GCM_NONCE_SIZE]);

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &combined,
                aad: AAD,
            },
        )
        .map_err(|_| CryptoError::AeadDecryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [0x11u8; KEY_SIZE];
        let plaintext = b"hello CrissCrossDHT";
        let sealed = seal(&key, plaintext).expect("seal");
        let opened = open(&key, &sealed).expect("open");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_open_fails_with_wrong_key() {
        let key1 = [0x01u8; KEY_SIZE];
        let key2 = [0x02u8; KEY_SIZE];
        let sealed = seal(&key1, b"secret").expect("seal");
        assert!(open(&key2, &sealed).is_err());
    }

    #[test]
    fn test_open_fails_on_tampered_ciphertext() {
        let key = [0x01u8; KEY_SIZE];
        let mut sealed = seal(&key, b"secret payload").expect("seal");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn test_open_fails_on_truncated_body() {
        let key = [0x01u8; KEY_SIZE];
        assert!(open(&key, &[0u8; 10]).is_err());
    }

    #[test]
    fn test_seal_nonce_is_fresh_each_time() {
        let key = [0x09u8; KEY_SIZE];
        let a = seal(&key, b"same plaintext").expect("seal");
        let b = seal(&key, b"same plaintext").expect("seal");
        assert_ne!(a, b, "IVs must not repeat");
    }
}

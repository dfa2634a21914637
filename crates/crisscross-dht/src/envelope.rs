//! Cluster framing: magic, cluster id, AEAD seal/open.
//!
//! Outbound: `"0A" || cluster_id(32) || seal(body, cluster_secret)`.
//! Inbound: strip the magic, read the cluster id, look the secret up, open;
//! a failed open is a silent drop.

use crisscross_crypto::aes_gcm;

use crate::id::NodeId;
use crate::{DhtError, Result};

/// ASCII "0A" magic prefixing every cluster datagram.
pub const MAGIC: [u8; 2] = [0x30, 0x41];

/// A cluster id, distinguishing independent overlays sharing one socket.
pub type ClusterId = NodeId;

/// Seal a plaintext message body for `cluster_id` under `secret`, producing
/// the full on-wire datagram.
pub fn seal(cluster_id: &ClusterId, secret: &[u8; 32], body: &[u8]) -> Result<Vec<u8>> {
    let sealed = aes_gcm::seal(secret, body)?;
    let mut out = Vec::with_capacity(MAGIC.len() + cluster_id.len() + sealed.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(cluster_id);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// A datagram with its magic and framing validated and its cluster id
/// extracted, but not yet opened (the caller must still look up the secret
/// for `cluster_id`).
pub struct Framed<'a> {
    pub cluster_id: ClusterId,
    pub sealed_body: &'a [u8],
}

/// Strip the magic and extract the cluster id, without attempting to open
/// the sealed body (the dispatcher needs the cluster id first, to look up
/// which secret to open with).
pub fn strip_framing(datagram: &[u8]) -> Option<Framed<'_>> {
    if datagram.len() < MAGIC.len() + 32 || datagram[..MAGIC.len()] != MAGIC[..] {
        return None;
    }
    let mut cluster_id = [0u8; 32];
    cluster_id.copy_from_slice(&datagram[MAGIC.len()..MAGIC.len() + 32]);
    Some(Framed {
        cluster_id,
        sealed_body: &datagram[MAGIC.len() + 32..],
    })
}

/// Open a sealed body under `secret`, returning the decrypted message body.
pub fn open(secret: &[u8; 32], sealed_body: &[u8]) -> Result<Vec<u8>> {
    aes_gcm::open(secret, sealed_body).map_err(DhtError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_strip_open_roundtrip() {
        let cluster_id = [3u8; 32];
        let secret = [9u8; 32];
        let body = b"encoded KRPC-like message";

        let datagram = seal(&cluster_id, &secret, body).expect("seal");
        let framed = strip_framing(&datagram).expect("valid framing");
        assert_eq!(framed.cluster_id, cluster_id);

        let opened = open(&secret, framed.sealed_body).expect("open");
        assert_eq!(opened, body);
    }

    #[test]
    fn test_strip_framing_rejects_bad_magic() {
        let mut datagram = vec![0xFFu8, 0xFF];
        datagram.extend_from_slice(&[0u8; 40]);
        assert!(strip_framing(&datagram).is_none());
    }

    #[test]
    fn test_strip_framing_rejects_short_datagram() {
        assert!(strip_framing(&[0x30, 0x41]).is_none());
    }

    #[test]
    fn test_open_fails_for_wrong_secret() {
        let cluster_id = [1u8; 32];
        let secret = [1u8; 32];
        let other_secret = [2u8; 32];
        let datagram = seal(&cluster_id, &secret, b"payload").expect("seal");
        let framed = strip_framing(&datagram).expect("strip framing");
        assert!(open(&other_secret, framed.sealed_body).is_err());
    }
}

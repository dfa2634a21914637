//! Lookup tokens.
//!
//! Standard Kademlia practice: `BLAKE3-keyed(secret, requester_ip ‖ target)`
//! truncated to 8 bytes. The keyed hash stands in for an HMAC, using
//! [`crisscross_crypto::blake3`] as the general-purpose MAC primitive. The
//! minting key rotates every 5 minutes; the previous key is still accepted
//! for one grace period so tokens handed out just before a rotation remain
//! valid.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use crisscross_crypto::blake3;

use crate::id::NodeId;

const TOKEN_LEN: usize = 8;
const ROTATION_INTERVAL_SECS: u64 = 5 * 60;

/// Minted token, opaque to callers.
pub type Token = [u8; TOKEN_LEN];

fn mac(key: &[u8; 32], requester_ip: IpAddr, target: &NodeId) -> Token {
    let mut msg = Vec::with_capacity(16 + target.len());
    match requester_ip {
        IpAddr::V4(v4) => msg.extend_from_slice(&v4.octets()),
        IpAddr::V6(v6) => msg.extend_from_slice(&v6.octets()),
    }
    msg.extend_from_slice(target);
    let digest = blake3::keyed_hash(key, &msg);
    let mut token = [0u8; TOKEN_LEN];
    token.copy_from_slice(&digest[..TOKEN_LEN]);
    token
}

/// Mints and validates lookup tokens, rotating its minting key on a timer.
pub struct TokenMinter {
    current_key: [u8; 32],
    previous_key: [u8; 32],
    last_rotation: Instant,
}

impl TokenMinter {
    /// Create a minter with a freshly derived key.
    pub fn new() -> Self {
        let key = blake3::derive_key("crisscross-dht-token", &rand::random::<[u8; 32]>());
        Self {
            current_key: key,
            previous_key: key,
            last_rotation: Instant::now(),
        }
    }

    /// Mint a token bound to `(requester_ip, target)` under the current key.
    pub fn mint(&self, requester_ip: IpAddr, target: &NodeId) -> Token {
        mac(&self.current_key, requester_ip, target)
    }

    /// Validate a token against both the current and previous (grace period)
    /// keys.
    pub fn validate(&self, token: &Token, requester_ip: IpAddr, target: &NodeId) -> bool {
        mac(&self.current_key, requester_ip, target) == *token
            || mac(&self.previous_key, requester_ip, target) == *token
    }

    /// Rotate the minting key if the rotation interval has elapsed. Returns
    /// `true` if a rotation happened.
    pub fn maybe_rotate(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_rotation)
            < Duration::from_secs(ROTATION_INTERVAL_SECS)
        {
            return false;
        }
        self.previous_key = self.current_key;
        self.current_key = blake3::derive_key("crisscross-dht-token", &rand::random::<[u8; 32]>());
        self.last_rotation = now;
        true
    }
}

impl Default for TokenMinter {
    fn default() -> Self {
        Self::new()
    }
}

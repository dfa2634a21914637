//! # crisscross-dht
//!
//! The Kademlia-style routing, search, codec, and envelope core of
//! CrissCrossDHT: a multi-cluster overlay where each cluster is an
//! independent DHT, gated by a symmetric AEAD secret and (optionally) a
//! Schnorr keypair authorizing writes to mutable name records.
//!
//! This crate implements the hard engineering core only: the routing table,
//! the iterative search engine, and the wire codec/envelope. Storage,
//! configuration parsing, and process supervision are external collaborators
//! reached through the interfaces in [`storage`] (re-exported from
//! `crisscross-storage`) and [`dispatcher`].
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | K (bucket capacity) | 8 |
//! | alpha (lookup parallelism) | 3 |
//! | Node id width | 256 bits |
//! | Query timeout | 5 seconds |
//! | Liveness response timeout | 15 minutes |
//! | Review timer | 5 minutes |
//! | Neighbourhood maintenance timer | 5 minutes ± jitter |
//! | Bucket maintenance timer | 3 minutes ± jitter |

pub mod bootstrap;
pub mod bucket;
pub mod codec;
pub mod dispatcher;
pub mod envelope;
pub mod id;
pub mod node;
pub mod records;
pub mod routing_table;
pub mod search;
pub mod token;

/// Bucket capacity.
pub const K: usize = 8;

/// Lookup parallelism factor.
pub const ALPHA: usize = 3;

/// Node id / hashed id width, in bytes.
pub const ID_LEN: usize = 32;

/// Node id / hashed id width, in bits.
pub const ID_BITS: usize = ID_LEN * 8;

/// Default per-query response deadline.
pub const QUERY_TIMEOUT_SECS: u64 = 5;

/// Liveness response timeout before a node is downgraded/evicted.
pub const RESPONSE_TIMEOUT_SECS: u64 = 15 * 60;

/// Review timer interval.
pub const REVIEW_INTERVAL_SECS: u64 = 5 * 60;

/// Neighbourhood maintenance timer base interval, before jitter.
pub const NEIGHBOURHOOD_INTERVAL_SECS: u64 = 5 * 60;

/// Bucket maintenance timer base interval, before jitter.
pub const BUCKET_MAINTENANCE_INTERVAL_SECS: u64 = 3 * 60;

/// Bucket maintenance refreshes any bucket below this size.
pub const BUCKET_MIN_SIZE: usize = 6;

/// Cap on the `known` candidate set size during a search.
pub const KNOWN_CAP: usize = 256;

/// Error types for DHT operations.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// A write was rejected because its signature does not verify.
    #[error("invalid record signature")]
    InvalidSignature,

    /// A name-record write was rejected: its generation does not exceed the
    /// one already stored.
    #[error("stale generation: got {got}, have {have}")]
    StaleGeneration { got: u64, have: u64 },

    /// A store/announce write was rejected for a missing or expired token.
    #[error("missing or stale token")]
    InvalidToken,

    /// The routing table has no bucket capacity left to split into.
    #[error("routing table bucket operation invalid: {0}")]
    RoutingTable(String),

    /// Bootstrap failed to discover any peers.
    #[error("bootstrap failed: {0}")]
    BootstrapFailed(String),

    /// A wire message could not be decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Cryptographic error from `crisscross-crypto` (AEAD, Schnorr).
    #[error("crypto error: {0}")]
    Crypto(#[from] crisscross_crypto::CryptoError),
}

/// Convenience result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(K, 8);
        assert_eq!(ALPHA, 3);
        assert_eq!(ID_LEN, 32);
        assert_eq!(ID_BITS, 256);
        assert_eq!(QUERY_TIMEOUT_SECS, 5);
        assert_eq!(RESPONSE_TIMEOUT_SECS, 900);
    }

    #[test]
    fn test_error_display() {
        let err = DhtError::StaleGeneration { got: 1, have: 5 };
        assert!(err.to_string().contains('1'));
        assert!(err.to_string().contains('5'));
    }
}

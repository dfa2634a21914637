//! # crisscross-crypto
//!
//! Cryptographic primitives for the CrissCrossDHT wire format.
//!
//! The cluster overlay fixes its cryptographic suite rather than negotiating
//! it: SHA3-256 for the node-id distance metric, AES-256-GCM for cluster
//! envelope sealing, and Schnorr-over-Ristretto255 for ownership proofs on
//! mutable name records.
//!
//! ## Modules
//!
//! - [`sha3`] — node-id hashing and XOR-distance helpers
//! - [`aes_gcm`] — AES-256-GCM seal/open for the cluster envelope
//! - [`schnorr`] — Schnorr keypair generation, signing, verification
//! - [`combine`] — canonical signable-message builder for value/name records
//! - [`blake3`] — general-purpose hashing and keyed MAC (token minting)

pub mod aes_gcm;
pub mod blake3;
pub mod combine;
pub mod schnorr;
pub mod sha3;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    AeadDecryption,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

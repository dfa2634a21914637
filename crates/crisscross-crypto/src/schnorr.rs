//! Schnorr signatures over Ristretto255.
//!
//! Ownership of a mutable name record is proven by a Schnorr signature
//! against the fixed context `"CrissCross-DHT"`. We need the context string
//! baked into the challenge hash itself, which rules out wrapping
//! `ed25519-dalek` (its EdDSA challenge hash is fixed to `SHA-512(R || A || M)`
//! with no room for a caller-supplied domain separator) — so this module
//! implements the textbook Fiat–Shamir Schnorr construction directly on top
//! of `curve25519-dalek`'s Ristretto255 group, the same way
//! [`crate::aes_gcm`] wraps `aes-gcm` instead of hand-rolling AES.
//!
//! Nonce generation is deterministic (`SHA3-512(secret_scalar || message)`,
//! reduced mod the group order) rather than drawn from an RNG, so a faulty
//! RNG on the signer's host can never cause nonce reuse and private-key
//! recovery.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use sha3::{Digest, Sha3_256, Sha3_512};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// Fixed Schnorr context string for CrissCrossDHT name-record ownership proofs.
pub const CONTEXT: &[u8] = b"CrissCross-DHT";

/// A Schnorr signing key (private scalar).
pub struct SigningKey {
    scalar: Scalar,
}

impl Clone for SigningKey {
    fn clone(&self) -> Self {
        Self {
            scalar: self.scalar,
        }
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.scalar.zeroize();
    }
}

/// A Schnorr verifying key (public group element).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VerifyingKey {
    #[serde(with = "point_serde")]
    point: CompressedRistretto,
}

/// A Schnorr signature: `(R, s)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Signature {
    #[serde(with = "point_serde")]
    r: CompressedRistretto,
    s: [u8; 32],
}

/// A Schnorr keypair.
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            scalar: Scalar::random(&mut rng),
        }
    }

    /// Build a signing key from a 32-byte seed, reducing it mod the group order.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            scalar: Scalar::from_bytes_mod_order(*bytes),
        }
    }

    /// Raw scalar bytes (canonical little-endian encoding).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.scalar.to_bytes()
    }

    /// Derive the corresponding verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            point: (self.scalar * RISTRETTO_BASEPOINT_POINT).compress(),
        }
    }

    /// Sign `message` under [`CONTEXT`].
    pub fn sign(&self, message: &[u8]) -> Signature {
        // Deterministic nonce: k = H(secret || message) mod order.
        let mut hasher = Sha3_512::new();
        hasher.update(self.scalar.to_bytes());
        hasher.update(message);
        let mut wide = [0u8; 64];
        wide.copy_from_slice(&hasher.finalize());
        let k = Scalar::from_bytes_mod_order_wide(&wide);

        let r_point = (k * RISTRETTO_BASEPOINT_POINT).compress();
        let public = (self.scalar * RISTRETTO_BASEPOINT_POINT).compress();
        let e = challenge(&r_point, &public, message);

        let s = k + e * self.scalar;
        Signature {
            r: r_point,
            s: s.to_bytes(),
        }
    }
}

impl VerifyingKey {
    /// Build a verifying key from its compressed 32-byte encoding.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let point = CompressedRistretto(*bytes);
        // Reject points that don't decompress (not on the curve / not in the
        // Ristretto subgroup).
        point
            .decompress()
            .ok_or(CryptoError::InvalidInput("invalid Ristretto point".into()))?;
        Ok(Self { point })
    }

    /// Compressed 32-byte encoding.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.point.to_bytes()
    }

    /// Verify a signature on `message` under [`CONTEXT`].
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let public = self
            .point
            .decompress()
            .ok_or(CryptoError::InvalidInput("invalid Ristretto point".into()))?;
        let r_point = signature
            .r
            .decompress()
            .ok_or(CryptoError::InvalidInput("invalid signature R".into()))?;

        let s = Scalar::from_canonical_bytes(signature.s)
            .into_option()
            .ok_or(CryptoError::InvalidInput("invalid signature s".into()))?;

        let e = challenge(&signature.r, &self.point, message);

        // Check: s*G == R + e*A
        let lhs: RistrettoPoint = s * RISTRETTO_BASEPOINT_POINT;
        let rhs: RistrettoPoint = r_point + e * public;

        if lhs.compress() == rhs.compress() {
            Ok(())
        } else {
            Err(CryptoError::SignatureVerification)
        }
    }
}

impl Signature {
    /// Encode as `R(32) || s(32)`.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r.to_bytes());
        out[32..].copy_from_slice(&self.s);
        out
    }

    /// Decode from `R(32) || s(32)`.
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Self {
            r: CompressedRistretto(r),
            s,
        }
    }
}

impl KeyPair {
    /// Generate a new random Schnorr keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate();
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }
}

/// Fiat-Shamir challenge: `e = SHA3-256(CONTEXT || R || A || message) mod order`.
fn challenge(r: &CompressedRistretto, public: &CompressedRistretto, message: &[u8]) -> Scalar {
    let mut hasher = Sha3_256::new();
    hasher.update(CONTEXT);
    hasher.update(r.as_bytes());
    hasher.update(public.as_bytes());
    hasher.update(message);
    let digest = hasher.finalize();
    let mut wide = [0u8; 64];
    wide[..32].copy_from_slice(&digest);
    Scalar::from_bytes_mod_order_wide(&wide)
}

mod point_serde {
    use curve25519_dalek::ristretto::CompressedRistretto;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(point: &CompressedRistretto, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(point.as_bytes())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<CompressedRistretto, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("expected 32-byte Ristretto point"));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(CompressedRistretto(arr))
    }
}

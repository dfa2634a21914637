//! Value and name record wire semantics.
//!
//! Storage itself is an external collaborator (see `crisscross-storage`);
//! this module only carries the shapes and the signature/generation rules
//! the dispatcher enforces before a `store`/`store_name` write reaches it.

use crisscross_crypto::combine;
use crisscross_crypto::schnorr::{Signature, VerifyingKey};
use crisscross_crypto::sha3;

use crate::id::NodeId;
use crate::{DhtError, Result};

/// An immutable key→value record.
#[derive(Clone, Debug)]
pub struct ValueRecord {
    pub key: NodeId,
    pub value: Vec<u8>,
    pub ttl: u64,
    pub signature: Signature,
}

/// A mutable, Schnorr-owned name record.
#[derive(Clone, Debug)]
pub struct NameRecord {
    pub name: NodeId,
    pub value: Vec<u8>,
    pub ttl: u64,
    pub generation: u64,
    pub owner_key: VerifyingKey,
    pub signature_name: Signature,
    pub signature_cluster: Option<Signature>,
}

/// Derive a name record's address from its owner's public key:
/// `name = hash(hash(pubkey))`.
pub fn name_for_pubkey(pubkey: &[u8; 32]) -> NodeId {
    sha3::hash(&sha3::hash(pubkey))
}

/// Verify a `store` write: the signature must cover `combine(key, value,
/// ttl)` under the cluster's write key.
pub fn verify_value_store(
    key: &NodeId,
    value: &[u8],
    ttl: u64,
    signature: &Signature,
    cluster_key: &VerifyingKey,
) -> Result<()> {
    let message = combine::value_record_message(key, value, ttl);
    cluster_key
        .verify(&message, signature)
        .map_err(|_| DhtError::InvalidSignature)
}

/// Verify a `store_name` write:
/// - `signature_name` must cover `combine(name, value, generation)` under the
///   record's own owner key (derived from the request's `priv` field).
/// - `name` must equal `hash(hash(priv))`.
/// - if the cluster has a write-gate key, `signature_cluster` must cover
///   `combine(name, value, generation, ttl)` under it.
/// - `generation` must strictly exceed the previously stored generation.
#[allow(clippy::too_many_arguments)]
pub fn verify_name_store(
    name: &NodeId,
    value: &[u8],
    ttl: u64,
    generation: u64,
    owner_key: &VerifyingKey,
    signature_name: &Signature,
    cluster_key: Option<&VerifyingKey>,
    signature_cluster: Option<&Signature>,
    stored_generation: Option<u64>,
) -> Result<()> {
    let expected_name = name_for_pubkey(&owner_key.to_bytes());
    if &expected_name != name {
        return Err(DhtError::InvalidSignature);
    }

    let owner_message = combine::name_record_owner_message(name, value, generation);
    owner_key
        .verify(&owner_message, signature_name)
        .map_err(|_| DhtError::InvalidSignature)?;

    if let Some(cluster_key) = cluster_key {
        let sig = signature_cluster.ok_or(DhtError::InvalidSignature)?;
        let cluster_message = combine::name_record_cluster_message(name, value, generation, ttl);
        cluster_key
            .verify(&cluster_message, sig)
            .map_err(|_| DhtError::InvalidSignature)?;
    }

    if !accepts_generation(generation, stored_generation) {
        return Err(DhtError::StaleGeneration {
            got: generation,
            have: stored_generation.unwrap_or(0),
        });
    }

    Ok(())
}

/// Whether `new_generation` may replace `stored_generation`.
pub fn accepts_generation(new_generation: u64, stored_generation: Option<u64>) -> bool {
    match stored_generation {
        Some(have) => new_generation > have,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crisscross_crypto::schnorr::KeyPair;

    #[test]
    fn test_accepts_generation_monotonic() {
        assert!(accepts_generation(6, Some(5)));
        assert!(!accepts_generation(5, Some(5)));
        assert!(!accepts_generation(4, Some(5)));
        assert!(accepts_generation(1, None));
    }

    #[test]
    fn test_verify_value_store_roundtrip() {
        let kp = KeyPair::generate();
        let key = [1u8; 32];
        let value = b"hello".to_vec();
        let ttl = 3600u64;
        let message = combine::value_record_message(&key, &value, ttl);
        let sig = kp.signing_key.sign(&message);
        assert!(verify_value_store(&key, &value, ttl, &sig, &kp.verifying_key).is_ok());
    }

    #[test]
    fn test_verify_value_store_rejects_bad_signature() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let key = [1u8; 32];
        let value = b"hello".to_vec();
        let message = combine::value_record_message(&key, &value, 100);
        let sig = kp.signing_key.sign(&message);
        assert!(verify_value_store(&key, &value, 100, &sig, &other.verifying_key).is_err());
    }

    #[test]
    fn test_verify_name_store_checks_name_derivation() {
        let kp = KeyPair::generate();
        let wrong_name = [9u8; 32];
        let value = b"v".to_vec();
        let msg = combine::name_record_owner_message(&wrong_name, &value, 1);
        let sig = kp.signing_key.sign(&msg);
        let result = verify_name_store(
            &wrong_name,
            &value,
            3600,
            1,
            &kp.verifying_key,
            &sig,
            None,
            None,
            None,
        );
        assert!(matches!(result, Err(DhtError::InvalidSignature)));
    }

    #[test]
    fn test_verify_name_store_full_roundtrip_with_cluster_gate() {
        let owner = KeyPair::generate();
        let cluster = KeyPair::generate();
        let name = name_for_pubkey(&owner.verifying_key.to_bytes());
        let value = b"v".to_vec();
        let generation = 1u64;
        let ttl = 3600u64;

        let owner_msg = combine::name_record_owner_message(&name, &value, generation);
        let sig_name = owner.signing_key.sign(&owner_msg);
        let cluster_msg = combine::name_record_cluster_message(&name, &value, generation, ttl);
        let sig_cluster = cluster.signing_key.sign(&cluster_msg);

        let result = verify_name_store(
            &name,
            &value,
            ttl,
            generation,
            &owner.verifying_key,
            &sig_name,
            Some(&cluster.verifying_key),
            Some(&sig_cluster),
            None,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_verify_name_store_rejects_stale_generation() {
        let owner = KeyPair::generate();
        let name = name_for_pubkey(&owner.verifying_key.to_bytes());
        let value = b"v".to_vec();
        let owner_msg = combine::name_record_owner_message(&name, &value, 5);
        let sig_name = owner.signing_key.sign(&owner_msg);

        let result = verify_name_store(
            &name,
            &value,
            3600,
            5,
            &owner.verifying_key,
            &sig_name,
            None,
            None,
            Some(5),
        );
        assert!(matches!(result, Err(DhtError::StaleGeneration { .. })));
    }
}

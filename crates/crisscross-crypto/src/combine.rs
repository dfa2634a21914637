//! Canonical signable-message construction.
//!
//! `combine(fields)` builds the exact byte string that gets signed for value
//! and name records. Two details need to be frozen for cross-implementation
//! interop:
//!
//! 1. Whether integer fields render as decimal text or 8-byte big-endian.
//! 2. How to avoid ambiguity when a binary field itself contains the `"."`
//!    join separator.
//!
//! This module freezes both (see DESIGN.md for the rationale): integers are
//! 8-byte big-endian, and every field is length-prefixed (`u32` big-endian)
//! before being written, so that the `"."`-joined legacy wire shape is kept
//! (for backward compatibility with existing CrissCrossDHT deployments) while
//! the length prefix removes any ambiguity a raw `"."` inside a binary field
//! could otherwise introduce.

/// A single field going into a `combine()` call.
pub enum Field<'a> {
    /// Raw bytes, written as-is (length-prefixed).
    Bytes(&'a [u8]),
    /// A `u64`, written as 8-byte big-endian (length-prefixed).
    U64(u64),
}

/// Build the canonical signable message: each field is written as
/// `LEN(4, BE) || bytes`, and fields are joined by a single `b'.'` byte.
pub fn combine(fields: &[Field<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(b'.');
        }
        match field {
            Field::Bytes(b) => {
                out.extend_from_slice(&(b.len() as u32).to_be_bytes());
                out.extend_from_slice(b);
            }
            Field::U64(v) => {
                let bytes = v.to_be_bytes();
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(&bytes);
            }
        }
    }
    out
}

/// Signable message for a value record: `combine(key, value, ttl)`.
pub fn value_record_message(key: &[u8; 32], value: &[u8], ttl: u64) -> Vec<u8> {
    combine(&[Field::Bytes(key), Field::Bytes(value), Field::U64(ttl)])
}

/// Signable message for a name record's owner signature:
/// `combine(name, value, generation)`.
pub fn name_record_owner_message(name: &[u8; 32], value: &[u8], generation: u64) -> Vec<u8> {
    combine(&[
        Field::Bytes(name),
        Field::Bytes(value),
        Field::U64(generation),
    ])
}

/// Signable message for a name record's cluster-write-gate signature:
/// `combine(name, value, generation, ttl)`.
pub fn name_record_cluster_message(
    name: &[u8; 32],
    value: &[u8],
    generation: u64,
    ttl: u64,
) -> Vec<u8> {
    combine(&[
        Field::Bytes(name),
        Field::Bytes(value),
        Field::U64(generation),
        Field::U64(ttl),
    ])
}

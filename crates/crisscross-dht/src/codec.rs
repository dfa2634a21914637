//! Wire codec: KRPC-like message encoding, transaction ids, compact node
//! lists.
//!
//! Messages are CBOR-encoded via `ciborium`: one map-shaped envelope per
//! datagram, walked by serde derive rather than hand-rolled field parsing.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::id::{Address, NodeId};
use crate::{DhtError, Result};

/// Opaque transaction id: 8 bytes, big-endian, from a monotonic counter.
pub type Tid = [u8; 8];

/// Generates unique transaction ids for a single dispatcher.
pub struct TidGenerator {
    counter: AtomicU64,
}

impl TidGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    /// The next tid. Monotonic, so collisions cannot occur within the
    /// lifetime of one generator.
    pub fn next(&self) -> Tid {
        self.counter.fetch_add(1, Ordering::Relaxed).to_be_bytes()
    }
}

impl Default for TidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Node address family requested in a `find_node`/`get_peers` query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    #[serde(rename = "n4")]
    V4,
    #[serde(rename = "n6")]
    V6,
}

/// The query method named in `q`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMethod {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "find_node")]
    FindNode,
    #[serde(rename = "find_value")]
    FindValue,
    #[serde(rename = "find_name")]
    FindName,
    #[serde(rename = "get_peers")]
    GetPeers,
    #[serde(rename = "announce_peer")]
    AnnouncePeer,
    #[serde(rename = "store")]
    Store,
    #[serde(rename = "store_name")]
    StoreName,
}

/// Query arguments (`a`). Every query uses the subset of fields its method
/// needs; unused fields are omitted on the wire.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryArgs {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub want: Option<Vec<Family>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<NodeId>,
    #[serde(default, rename = "gen", skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noseed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<Vec<u8>>,
    /// The serialized owner public key for `store_name` (wire name `priv`,
    /// not a private key despite the field name).
    #[serde(default, rename = "priv", skip_serializing_if = "Option::is_none")]
    pub owner_pubkey: Option<[u8; 32]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_ns: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Vec<u8>>,
}

/// Response arguments (`r`). Populated according to which query it answers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResponseArgs {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes6: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Vec<u8>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    #[serde(default, rename = "gen", skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrote: Option<bool>,
}

/// The top-level envelope: `y` discriminates query / response / error.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "y")]
pub enum Message {
    #[serde(rename = "q")]
    Query {
        t: Tid,
        q: QueryMethod,
        a: QueryArgs,
    },
    #[serde(rename = "r")]
    Response { t: Tid, r: ResponseArgs },
    #[serde(rename = "e")]
    Error { t: Tid, e: (u32, String) },
}

impl Message {
    pub fn tid(&self) -> Tid {
        match self {
            Message::Query { t, .. } => *t,
            Message::Response { t, .. } => *t,
            Message::Error { t, .. } => *t,
        }
    }
}

/// Numeric error codes for `e` replies.
pub mod error_code {
    pub const SERVER_ERROR: u32 = 202;
    pub const PROTOCOL_ERROR: u32 = 203;
}

/// Encode a message to its CBOR wire form.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(message, &mut buf)
        .map_err(|e| DhtError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decode a message from its CBOR wire form.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    ciborium::de::from_reader(bytes).map_err(|e| DhtError::Codec(e.to_string()))
}

/// Compact-encode a list of `(hashed_id, addr)` pairs of the given family.
/// IPv4 entries are `id(32) || ip(4) || port(2)`; IPv6 entries are
/// `id(32) || ip(16) || port(2)`.
pub fn encode_compact_nodes<'a>(nodes: impl Iterator<Item = (&'a NodeId, &'a Address)>, family: Family) -> Vec<u8> {
    let mut out = Vec::new();
    for (id, addr) in nodes {
        match (family, addr.ip()) {
            (Family::V4, std::net::IpAddr::V4(v4)) => {
                out.extend_from_slice(id);
                out.extend_from_slice(&v4.octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            (Family::V6, std::net::IpAddr::V6(v6)) => {
                out.extend_from_slice(id);
                out.extend_from_slice(&v6.octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            _ => continue,
        }
    }
    out
}

/// Decode a compact node list of the given family.
pub fn decode_compact_nodes(bytes: &[u8], family: Family) -> Result<Vec<(NodeId, Address)>> {
    let entry_len = match family {
        Family::V4 => 32 + 4 + 2,
        Family::V6 => 32 + 16 + 2,
    };
    if bytes.len() % entry_len != 0 {
        return Err(DhtError::Codec(format!(
            "compact node list length {} not a multiple of entry size {}",
            bytes.len(),
            entry_len
        )));
    }
    let mut out = Vec::with_capacity(bytes.len() / entry_len);
    for chunk in bytes.chunks_exact(entry_len) {
        let mut id = [0u8; 32];
        id.copy_from_slice(&chunk[..32]);
        let addr = match family {
            Family::V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&chunk[32..36]);
                let port = u16::from_be_bytes([chunk[36], chunk[37]]);
                SocketAddr::from((Ipv4Addr::from(octets), port))
            }
            Family::V6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&chunk[32..48]);
                let port = u16::from_be_bytes([chunk[48], chunk[49]]);
                SocketAddr::from((Ipv6Addr::from(octets), port))
            }
        };
        out.push((id, addr));
    }
    Ok(out)
}

/// Render an address the way CrissCrossDHT's logs and diagnostics do:
/// `ip:port` for IPv4, `[ip]:port` for IPv6 with each group zero-padded to
/// four uppercase hex digits and no `::` compression.
pub fn tuple_to_ipstr(addr: &Address) -> String {
    match addr.ip() {
        std::net::IpAddr::V4(v4) => format!("{v4}:{}", addr.port()),
        std::net::IpAddr::V6(v6) => {
            let groups: Vec<String> = v6.segments().iter().map(|s| format!("{s:04X}")).collect();
            format!("[{}]:{}", groups.join(":"), addr.port())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tid_generator_is_monotonic_and_distinct() {
        let gen = TidGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
        assert!(u64::from_be_bytes(a) < u64::from_be_bytes(b));
    }

    #[test]
    fn test_ping_query_roundtrip() {
        let msg = Message::Query {
            t: [0, 0, 0, 0, 0, 0, 0, 1],
            q: QueryMethod::Ping,
            a: QueryArgs {
                id: [1u8; 32],
                ..Default::default()
            },
        };
        let bytes = encode(&msg).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        match decoded {
            Message::Query { q, a, .. } => {
                assert_eq!(q, QueryMethod::Ping);
                assert_eq!(a.id, [1u8; 32]);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_find_node_query_with_want_roundtrip() {
        let msg = Message::Query {
            t: [0; 8],
            q: QueryMethod::FindNode,
            a: QueryArgs {
                id: [2u8; 32],
                target: Some([3u8; 32]),
                want: Some(vec![Family::V4, Family::V6]),
                ..Default::default()
            },
        };
        let bytes = encode(&msg).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        match decoded {
            Message::Query { a, .. } => {
                assert_eq!(a.target, Some([3u8; 32]));
                assert_eq!(a.want, Some(vec![Family::V4, Family::V6]));
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_response_roundtrip() {
        let msg = Message::Response {
            t: [0; 8],
            r: ResponseArgs {
                id: [4u8; 32],
                nodes: Some(vec![9u8; 38]),
                ..Default::default()
            },
        };
        let bytes = encode(&msg).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        match decoded {
            Message::Response { r, .. } => assert_eq!(r.nodes, Some(vec![9u8; 38])),
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn test_error_roundtrip() {
        let msg = Message::Error {
            t: [0; 8],
            e: (error_code::PROTOCOL_ERROR, "bad token".into()),
        };
        let bytes = encode(&msg).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        match decoded {
            Message::Error { e, .. } => assert_eq!(e.0, error_code::PROTOCOL_ERROR),
            _ => panic!("expected error"),
        }
    }

    #[test]
    fn test_compact_nodes_v4_roundtrip() {
        let id_a = [1u8; 32];
        let id_b = [2u8; 32];
        let addr_a: Address = "10.0.0.1:6881".parse().expect("parse addr");
        let addr_b: Address = "10.0.0.2:6882".parse().expect("parse addr");
        let nodes = vec![(&id_a, &addr_a), (&id_b, &addr_b)];
        let encoded = encode_compact_nodes(nodes.into_iter(), Family::V4);
        assert_eq!(encoded.len(), 2 * (32 + 4 + 2));
        let decoded = decode_compact_nodes(&encoded, Family::V4).expect("decode nodes");
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], (id_a, addr_a));
        assert_eq!(decoded[1], (id_b, addr_b));
    }

    #[test]
    fn test_compact_nodes_v6_roundtrip() {
        let id = [7u8; 32];
        let addr: Address = "[2001:db8::1]:6881".parse().expect("parse addr");
        let encoded = encode_compact_nodes(std::iter::once((&id, &addr)), Family::V6);
        assert_eq!(encoded.len(), 32 + 16 + 2);
        let decoded = decode_compact_nodes(&encoded, Family::V6).expect("decode nodes");
        assert_eq!(decoded[0], (id, addr));
    }

    #[test]
    fn test_decode_compact_nodes_rejects_misaligned_length() {
        let bad = vec![0u8; 37];
        assert!(decode_compact_nodes(&bad, Family::V4).is_err());
    }

    #[test]
    fn test_tuple_to_ipstr_v4() {
        let addr: Address = "127.0.0.1:6881".parse().expect("parse addr");
        assert_eq!(tuple_to_ipstr(&addr), "127.0.0.1:6881");
    }

    #[test]
    fn test_tuple_to_ipstr_v6() {
        let addr: Address = SocketAddr::from((
            Ipv6Addr::new(8193, 16848, 12, 1452, 5, 0, 0, 1),
            6881,
        ));
        assert_eq!(
            tuple_to_ipstr(&addr),
            "[2001:41D0:000C:05AC:0005:0000:0000:0001]:6881"
        );
    }
}

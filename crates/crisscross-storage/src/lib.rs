//! Storage interface consumed by the dispatcher.
//!
//! The production backend is an external collaborator reached through this
//! trait; only the interface is specified here, plus an in-memory reference
//! implementation for tests and non-Redis deployments.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// A 32-byte cluster identifier.
pub type ClusterId = [u8; 32];

/// A 32-byte key, name, or info-hash.
pub type Key = [u8; 32];

/// A stored immutable value.
#[derive(Clone, Debug)]
pub struct ValueEntry {
    pub value: Vec<u8>,
    pub ttl: u64,
    pub stored_at: Instant,
}

/// A stored mutable name record.
#[derive(Clone, Debug)]
pub struct NameEntry {
    pub value: Vec<u8>,
    pub generation: u64,
    pub ttl: u64,
    pub stored_at: Instant,
}

/// A `get_peers`/`announce_peer` entry.
#[derive(Clone, Debug)]
pub struct PeerEntry {
    pub addr: SocketAddr,
    pub announced_at: Instant,
    pub ttl: u64,
    pub meta: Option<Vec<u8>>,
}

/// The storage interface the dispatcher's query handlers use to serve
/// `find_value`, `store`, `find_name`, `store_name`, `get_peers`, and
/// `announce_peer`. Implementations must be safe for
/// concurrent calls.
pub trait Storage: Send + Sync {
    /// Fetch an immutable value by cluster and key.
    fn get(&self, cluster: ClusterId, key: Key) -> impl Future<Output = Option<ValueEntry>> + Send;

    /// Write an immutable value (the caller has already verified its
    /// signature). Returns whether the write was accepted.
    fn put(
        &self,
        cluster: ClusterId,
        key: Key,
        value: Vec<u8>,
        ttl: u64,
    ) -> impl Future<Output = bool> + Send;

    /// Fetch a mutable name record by cluster and name.
    fn get_name(&self, cluster: ClusterId, name: Key) -> impl Future<Output = Option<NameEntry>> + Send;

    /// Write a mutable name record (the caller has already verified
    /// signatures). Must enforce generation monotonicity: returns `false`
    /// if `generation` does not strictly exceed the stored generation.
    fn put_name(
        &self,
        cluster: ClusterId,
        name: Key,
        value: Vec<u8>,
        generation: u64,
        ttl: u64,
    ) -> impl Future<Output = bool> + Send;

    /// Fetch the known peer addresses for an info-hash.
    fn get_peers(&self, cluster: ClusterId, hash: Key) -> impl Future<Output = Vec<SocketAddr>> + Send;

    /// Record that `addr` announced itself for `hash`, carrying optional
    /// caller-supplied metadata.
    fn announce(
        &self,
        cluster: ClusterId,
        hash: Key,
        addr: SocketAddr,
        meta: Option<Vec<u8>>,
        ttl: u64,
    ) -> impl Future<Output = ()> + Send;
}

/// An in-memory reference [`Storage`] implementation behind `RwLock`-guarded
/// maps. Used by dispatcher tests and any deployment without Redis.
#[derive(Default)]
pub struct MemStorage {
    values: RwLock<HashMap<(ClusterId, Key), ValueEntry>>,
    names: RwLock<HashMap<(ClusterId, Key), NameEntry>>,
    peers: RwLock<HashMap<(ClusterId, Key), Vec<PeerEntry>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    async fn get(&self, cluster: ClusterId, key: Key) -> Option<ValueEntry> {
        self.values.read().await.get(&(cluster, key)).cloned()
    }

    async fn put(&self, cluster: ClusterId, key: Key, value: Vec<u8>, ttl: u64) -> bool {
        self.values.write().await.insert(
            (cluster, key),
            ValueEntry {
                value,
                ttl,
                stored_at: Instant::now(),
            },
        );
        true
    }

    async fn get_name(&self, cluster: ClusterId, name: Key) -> Option<NameEntry> {
        self.names.read().await.get(&(cluster, name)).cloned()
    }

    async fn put_name(&self, cluster: ClusterId, name: Key, value: Vec<u8>, generation: u64, ttl: u64) -> bool {
        let mut names = self.names.write().await;
        let accepts = match names.get(&(cluster, name)) {
            Some(existing) => generation > existing.generation,
            None => true,
        };
        if accepts {
            names.insert(
                (cluster, name),
                NameEntry {
                    value,
                    generation,
                    ttl,
                    stored_at: Instant::now(),
                },
            );
        }
        accepts
    }

    async fn get_peers(&self, cluster: ClusterId, hash: Key) -> Vec<SocketAddr> {
        self.peers
            .read()
            .await
            .get(&(cluster, hash))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.announced_at.elapsed() < Duration::from_secs(e.ttl))
                    .map(|e| e.addr)
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn announce(&self, cluster: ClusterId, hash: Key, addr: SocketAddr, meta: Option<Vec<u8>>, ttl: u64) {
        let mut peers = self.peers.write().await;
        let entries = peers.entry((cluster, hash)).or_default();
        entries.retain(|e| e.addr != addr);
        entries.push(PeerEntry {
            addr,
            announced_at: Instant::now(),
            ttl,
            meta,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let storage = MemStorage::new();
        let cluster = [1u8; 32];
        let key = [2u8; 32];
        assert!(storage.put(cluster, key, b"hello".to_vec(), 3600).await);
        let entry = storage.get(cluster, key).await.expect("present");
        assert_eq!(entry.value, b"hello");
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let storage = MemStorage::new();
        assert!(storage.get([0u8; 32], [0u8; 32]).await.is_none());
    }

    #[tokio::test]
    async fn test_put_name_enforces_generation_monotonicity() {
        let storage = MemStorage::new();
        let cluster = [1u8; 32];
        let name = [3u8; 32];
        assert!(storage.put_name(cluster, name, b"v1".to_vec(), 5, 3600).await);
        assert!(!storage.put_name(cluster, name, b"v2".to_vec(), 5, 3600).await);
        assert!(storage.put_name(cluster, name, b"v3".to_vec(), 6, 3600).await);
        let entry = storage.get_name(cluster, name).await.expect("present");
        assert_eq!(entry.value, b"v3");
        assert_eq!(entry.generation, 6);
    }

    #[tokio::test]
    async fn test_announce_then_get_peers() {
        let storage = MemStorage::new();
        let cluster = [1u8; 32];
        let hash = [4u8; 32];
        let addr: SocketAddr = "127.0.0.1:6881".parse().expect("parse addr");
        storage.announce(cluster, hash, addr, None, 3600).await;
        let peers = storage.get_peers(cluster, hash).await;
        assert_eq!(peers, vec![addr]);
    }

    #[tokio::test]
    async fn test_announce_same_peer_twice_does_not_duplicate() {
        let storage = MemStorage::new();
        let cluster = [1u8; 32];
        let hash = [4u8; 32];
        let addr: SocketAddr = "127.0.0.1:6881".parse().expect("parse addr");
        storage.announce(cluster, hash, addr, None, 3600).await;
        storage.announce(cluster, hash, addr, None, 3600).await;
        assert_eq!(storage.get_peers(cluster, hash).await.len(), 1);
    }
}

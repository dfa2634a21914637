//! Cluster configuration file.
//!
//! TOML-encoded. Base58 is used for every binary field (cluster ids, secrets,
//! keys) to keep the file human-typeable.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crisscross_crypto::schnorr::{SigningKey, VerifyingKey};
use crisscross_dht::dispatcher::ClusterContext;
use crisscross_dht::id::NodeId;

/// Errors while loading or resolving a cluster configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cluster {cluster}: invalid base58 in field {field}: {source}")]
    Base58 {
        cluster: String,
        field: &'static str,
        source: bs58::decode::Error,
    },

    #[error("cluster {cluster}: field {field} must decode to {expected} bytes, got {got}")]
    WrongLength {
        cluster: String,
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("cluster {cluster}: invalid public_key: {0}")]
    InvalidPublicKey(crisscross_crypto::CryptoError),

    #[error("{addr:?} is not a valid socket address")]
    InvalidAddr { addr: String },
}

/// The on-disk configuration surface.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterConfigFile {
    /// Well-known seed nodes shared by every configured cluster.
    #[serde(default)]
    pub bootstrap_nodes: Vec<BootstrapNodeConfig>,
    /// Base58 cluster id -> cluster entry.
    #[serde(default)]
    pub clusters: HashMap<String, ClusterEntryConfig>,
    /// Timer overrides.
    #[serde(default)]
    pub timers: TimerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapNodeConfig {
    pub host: String,
    pub port: u16,
    /// Base58-encoded raw node id. Not required to dial the seed (the
    /// initial ping's pong supplies the id we actually insert), but kept on
    /// the config surface and checked against the pong so a misconfigured
    /// seed entry is caught rather than silently accepted.
    pub node_id: String,
}

/// One cluster's key material, as Base58 strings on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterEntryConfig {
    /// Local UDP address this cluster's dispatcher binds to.
    pub listen_addr: String,
    /// AES-256-GCM secret, Base58-encoded (32 bytes).
    pub secret: String,
    /// Write-gate Schnorr verifying key, Base58-encoded (32 bytes). Absent
    /// means the cluster accepts any owner-signed `store`/`store_name`.
    #[serde(default)]
    pub public_key: Option<String>,
    /// This node's Schnorr signing key for the cluster's write gate,
    /// Base58-encoded (32 bytes). Only set on nodes authorized to publish.
    #[serde(default)]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_review_interval_secs")]
    pub review_interval_secs: u64,
    #[serde(default = "default_neighbourhood_interval_secs")]
    pub neighbourhood_interval_secs: u64,
    #[serde(default = "default_bucket_maintenance_interval_secs")]
    pub bucket_maintenance_interval_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            review_interval_secs: default_review_interval_secs(),
            neighbourhood_interval_secs: default_neighbourhood_interval_secs(),
            bucket_maintenance_interval_secs: default_bucket_maintenance_interval_secs(),
        }
    }
}

fn default_review_interval_secs() -> u64 {
    crisscross_dht::REVIEW_INTERVAL_SECS
}

fn default_neighbourhood_interval_secs() -> u64 {
    crisscross_dht::NEIGHBOURHOOD_INTERVAL_SECS
}

fn default_bucket_maintenance_interval_secs() -> u64 {
    crisscross_dht::BUCKET_MAINTENANCE_INTERVAL_SECS
}

impl TimerConfig {
    /// Convert to the runtime intervals a [`crisscross_dht::dispatcher::Dispatcher`] drives on.
    pub fn to_intervals(&self) -> crisscross_dht::dispatcher::Intervals {
        crisscross_dht::dispatcher::Intervals {
            review: std::time::Duration::from_secs(self.review_interval_secs),
            neighbourhood: std::time::Duration::from_secs(self.neighbourhood_interval_secs),
            bucket_maintenance: std::time::Duration::from_secs(self.bucket_maintenance_interval_secs),
        }
    }
}

impl ClusterConfigFile {
    /// Load and parse a configuration file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: ClusterConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parsed, socket-address-resolved bootstrap node list. The Base58
    /// `node_id` is decoded for validation but the caller learns the seed's
    /// actual id from its pong, per [`crisscross_dht::bootstrap::bootstrap`].
    pub fn bootstrap_seeds(&self) -> Result<Vec<(SocketAddr, NodeId)>, ConfigError> {
        self.bootstrap_nodes
            .iter()
            .map(|n| {
                let addr_str = format!("{}:{}", n.host, n.port);
                let addr = addr_str
                    .parse()
                    .map_err(|_| ConfigError::InvalidAddr { addr: addr_str })?;
                let node_id = decode_32("bootstrap_nodes", "node_id", &n.node_id)?;
                Ok((addr, node_id))
            })
            .collect()
    }

    /// Just the addresses, for driving [`crisscross_dht::bootstrap::BootstrapConfig`].
    pub fn bootstrap_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        Ok(self.bootstrap_seeds()?.into_iter().map(|(addr, _)| addr).collect())
    }

    /// Decode every configured cluster into a runtime [`ResolvedCluster`].
    pub fn resolve_clusters(&self) -> Result<Vec<ResolvedCluster>, ConfigError> {
        self.clusters
            .iter()
            .map(|(id_b58, entry)| resolve_one(id_b58, entry))
            .collect()
    }
}

/// A fully decoded cluster, ready to back a [`crisscross_dht::dispatcher::Dispatcher`].
pub struct ResolvedCluster {
    pub listen_addr: SocketAddr,
    pub context: ClusterContext,
    /// This node's signing key for the cluster's write gate, if configured.
    pub signing_key: Option<SigningKey>,
}

fn decode_32(cluster: &str, field: &'static str, value: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = bs58::decode(value)
        .into_vec()
        .map_err(|source| ConfigError::Base58 {
            cluster: cluster.to_string(),
            field,
            source,
        })?;
    if bytes.len() != 32 {
        return Err(ConfigError::WrongLength {
            cluster: cluster.to_string(),
            field,
            expected: 32,
            got: bytes.len(),
        });
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn resolve_one(id_b58: &str, entry: &ClusterEntryConfig) -> Result<ResolvedCluster, ConfigError> {
    let cluster_id = decode_32(id_b58, "cluster_id", id_b58)?;
    let secret = decode_32(id_b58, "secret", &entry.secret)?;
    let listen_addr = entry
        .listen_addr
        .parse()
        .map_err(|_| ConfigError::InvalidAddr {
            addr: entry.listen_addr.clone(),
        })?;

    let write_key = entry
        .public_key
        .as_deref()
        .map(|b58| decode_32(id_b58, "public_key", b58))
        .transpose()?
        .map(|bytes| VerifyingKey::from_bytes(&bytes).map_err(ConfigError::InvalidPublicKey))
        .transpose()?;

    let signing_key = entry
        .private_key
        .as_deref()
        .map(|b58| decode_32(id_b58, "private_key", b58))
        .transpose()?
        .map(|bytes| SigningKey::from_bytes(&bytes));

    Ok(ResolvedCluster {
        listen_addr,
        context: ClusterContext {
            cluster_id,
            secret,
            write_key,
        },
        signing_key,
    })
}

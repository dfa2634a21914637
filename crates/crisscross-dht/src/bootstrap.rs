//! Joining a cluster: contact seed nodes, then self-lookup.
//!
//! A two-phase shape: ping every configured seed, then run a `find_node`
//! lookup on the local id to populate nearby buckets. Drives straight
//! through [`crate::dispatcher::Dispatcher`], which already owns the socket
//! bootstrap needs, so there's no separate transport abstraction to thread
//! through.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crisscross_storage::Storage;

use crate::dispatcher::Dispatcher;
use crate::search::{SearchKind, SearchResult};
use crate::{DhtError, Result};

/// Bootstrap parameters.
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    /// Addresses of well-known seed nodes to contact first.
    pub seed_addrs: Vec<SocketAddr>,
    /// Minimum number of seeds that must answer the initial ping.
    pub min_responsive_seeds: usize,
    /// Per-seed ping timeout.
    pub ping_timeout: Duration,
    /// Deadline for the self-lookup `find_node` search.
    pub lookup_timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            seed_addrs: Vec::new(),
            min_responsive_seeds: 1,
            ping_timeout: Duration::from_secs(5),
            lookup_timeout: Duration::from_secs(30),
        }
    }
}

impl BootstrapConfig {
    pub fn new(seed_addrs: Vec<SocketAddr>) -> Self {
        Self {
            seed_addrs,
            ..Default::default()
        }
    }

    /// Validate the configuration before attempting to bootstrap.
    pub fn validate(&self) -> Result<()> {
        if self.seed_addrs.is_empty() {
            return Err(DhtError::BootstrapFailed("no seed nodes configured".to_string()));
        }
        if self.min_responsive_seeds > self.seed_addrs.len() {
            return Err(DhtError::BootstrapFailed(format!(
                "min_responsive_seeds ({}) exceeds total seed nodes ({})",
                self.min_responsive_seeds,
                self.seed_addrs.len(),
            )));
        }
        Ok(())
    }
}

/// Outcome of a bootstrap attempt.
#[derive(Clone, Debug)]
pub struct BootstrapResult {
    pub responsive_seeds: usize,
    pub peers_discovered: usize,
}

/// Join a cluster: ping every configured seed, insert the responsive ones,
/// then run a `find_node` self-lookup to fill out the rest of the routing
/// table. Drives the dispatcher's socket directly via
/// [`Dispatcher::drive_until`] — nothing else is servicing it yet.
pub async fn bootstrap<S: Storage>(config: &BootstrapConfig, dispatcher: &mut Dispatcher<S>) -> Result<BootstrapResult> {
    config.validate()?;
    info!(seed_count = config.seed_addrs.len(), "starting cluster bootstrap");

    let mut responsive_seeds = 0usize;
    for addr in &config.seed_addrs {
        let rx = dispatcher.ping(*addr);
        let outcome = dispatcher.drive_until(tokio::time::timeout(config.ping_timeout, rx)).await;
        match outcome {
            Ok(Ok(raw_id)) => {
                dispatcher.routing_table_mut().insert(raw_id, *addr);
                responsive_seeds += 1;
                info!(%addr, "seed node responded");
            }
            _ => warn!(%addr, "seed node did not respond to ping"),
        }
    }

    if responsive_seeds < config.min_responsive_seeds {
        return Err(DhtError::BootstrapFailed(format!(
            "only {} of {} required seed nodes responded",
            responsive_seeds, config.min_responsive_seeds,
        )));
    }

    let self_id = *dispatcher.routing_table().self_hashed_id();
    let before = dispatcher.routing_table().size();

    let deadline = Instant::now() + config.lookup_timeout;
    let search_rx = dispatcher.launch_search(SearchKind::FindNode, self_id, deadline);
    let lookup_outcome = dispatcher
        .drive_until(tokio::time::timeout(config.lookup_timeout + Duration::from_secs(1), search_rx))
        .await;
    match lookup_outcome {
        Ok(Ok(SearchResult::ClosestNodes(nodes))) => {
            info!(found = nodes.len(), "self-lookup converged");
        }
        _ => warn!("self-lookup during bootstrap did not converge before its deadline"),
    }

    let after = dispatcher.routing_table().size();
    let result = BootstrapResult {
        responsive_seeds,
        peers_discovered: after.saturating_sub(before),
    };
    info!(
        responsive_seeds = result.responsive_seeds,
        peers_discovered = result.peers_discovered,
        "bootstrap complete"
    );
    Ok(result)
}

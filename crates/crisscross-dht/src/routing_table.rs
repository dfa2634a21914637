//! Kademlia routing table with bucket splitting.
//!
//! XOR-distance bucketing; `closest_nodes` is a linear scan across buckets
//! rather than a balanced tree, which is plenty fast at this node count.
//! Buckets split on overflow of the *last* bucket only (incumbents elsewhere
//! are never displaced), and all indexing is by the *hashed* id exclusively.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::bucket::Bucket;
use crate::id::{self, Address, NodeId};
use crate::node::{Goodness, Node};
use crate::{K, RESPONSE_TIMEOUT_SECS};

/// Outcome of [`RoutingTable::insert`], surfaced mainly for tests and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The candidate shares the routing table's own raw or hashed id.
    IsSelf,
    /// The candidate's hashed id is already present.
    AlreadyPresent,
    /// Accepted into a bucket (after zero or more splits).
    Inserted,
    /// The target bucket was full and not eligible to split.
    Dropped,
}

/// An action the owning task should perform as a result of a periodic review
/// or maintenance pass. The routing table only decides; it never touches a
/// socket.
#[derive(Clone, Copy, Debug)]
pub enum ReviewAction {
    /// Send a keep-alive ping to confirm liveness.
    Ping { hashed_id: NodeId, addr: Address },
    /// The node was deleted from the table after failing to respond through
    /// two consecutive review windows.
    Evicted { hashed_id: NodeId },
}

/// A maintenance target: launch a `find_node` search for `target` to refresh
/// the bucket at `bucket_index`.
#[derive(Clone, Copy, Debug)]
pub struct MaintenanceTarget {
    pub bucket_index: usize,
    pub target: NodeId,
}

/// The Kademlia routing table for a single cluster.
pub struct RoutingTable {
    self_raw_id: NodeId,
    self_hashed_id: NodeId,
    buckets: Vec<Bucket>,
    by_addr: HashMap<Address, NodeId>,
}

impl RoutingTable {
    /// Create a routing table for `self_raw_id`, starting with a single bucket.
    pub fn new(self_raw_id: NodeId) -> Self {
        let self_hashed_id = id::hash_id(&self_raw_id);
        Self {
            self_raw_id,
            self_hashed_id,
            buckets: vec![Bucket::new()],
            by_addr: HashMap::new(),
        }
    }

    pub fn self_raw_id(&self) -> &NodeId {
        &self.self_raw_id
    }

    pub fn self_hashed_id(&self) -> &NodeId {
        &self.self_hashed_id
    }

    fn last_bucket_index(&self) -> usize {
        self.buckets.len() - 1
    }

    /// Insert a freshly discovered peer.
    pub fn insert(&mut self, raw_id: NodeId, addr: Address) -> InsertOutcome {
        if raw_id == self.self_raw_id {
            return InsertOutcome::IsSelf;
        }
        let hashed_id = id::hash_id(&raw_id);
        if hashed_id == self.self_hashed_id {
            return InsertOutcome::IsSelf;
        }
        if self.get(&hashed_id).is_some() {
            return InsertOutcome::AlreadyPresent;
        }
        self.insert_hashed(raw_id, hashed_id, addr)
    }

    fn insert_hashed(&mut self, raw_id: NodeId, hashed_id: NodeId, addr: Address) -> InsertOutcome {
        loop {
            let last = self.last_bucket_index();
            let Some(bucket_index) = id::bucket_index(&self.self_hashed_id, &hashed_id, last) else {
                return InsertOutcome::IsSelf;
            };

            if self.buckets[bucket_index].has_space() {
                self.buckets[bucket_index].add(Node::new(raw_id, hashed_id, addr, bucket_index));
                self.by_addr.insert(addr, hashed_id);
                return InsertOutcome::Inserted;
            }

            if bucket_index != last {
                return InsertOutcome::Dropped;
            }

            self.split_last_bucket();
        }
    }

    /// Append a new empty bucket and redistribute the old last bucket's nodes
    /// across the two, each recomputing its own correct index.
    fn split_last_bucket(&mut self) {
        let old_index = self.last_bucket_index();
        let drained: Vec<Node> = self.buckets[old_index].filter(|_| false);
        self.buckets.push(Bucket::new());
        let new_last = self.last_bucket_index();

        for mut node in drained {
            let idx = id::bucket_index(&self.self_hashed_id, &node.hashed_id, new_last)
                .unwrap_or(old_index);
            node.bucket_index = idx;
            self.buckets[idx].add(node);
        }
    }

    /// The 8 nodes closest to `target` by XOR distance, excluding `exclude`
    /// when given.
    pub fn closest_nodes(&self, target: &NodeId, exclude: Option<&NodeId>) -> Vec<Node> {
        let mut all: Vec<&Node> = self
            .buckets
            .iter()
            .flat_map(|b| b.nodes())
            .filter(|n| exclude != Some(&n.hashed_id))
            .collect();
        all.sort_by(|a, b| id::xor_cmp(&a.hashed_id, &b.hashed_id, target));
        all.into_iter().take(K).cloned().collect()
    }

    /// Look up a node by hashed id.
    pub fn get(&self, hashed_id: &NodeId) -> Option<&Node> {
        self.buckets.iter().find_map(|b| b.get(hashed_id))
    }

    /// Look up a node by its UDP address.
    pub fn get_by_address(&self, addr: &Address) -> Option<&Node> {
        let hashed_id = self.by_addr.get(addr)?;
        self.get(hashed_id)
    }

    /// Record that a response (or any traffic proving liveness) was just
    /// received from `hashed_id`, if it is currently held. A no-op for unknown ids.
    pub fn mark_responded(&mut self, hashed_id: &NodeId) {
        for bucket in &mut self.buckets {
            if let Some(node) = bucket.get_mut(hashed_id) {
                node.mark_responded();
                bucket.update();
                return;
            }
        }
    }

    /// Remove a node from both the bucket list and the address index.
    pub fn delete(&mut self, hashed_id: &NodeId) -> Option<Node> {
        for bucket in &mut self.buckets {
            if let Some(node) = bucket.del(hashed_id) {
                self.by_addr.remove(&node.addr);
                return Some(node);
            }
        }
        None
    }

    /// Total number of nodes currently held.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(Bucket::size).sum()
    }

    /// Total node capacity across all buckets.
    pub fn cache_size(&self) -> usize {
        self.buckets.len() * K
    }

    /// Number of buckets currently allocated.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Review every node for liveness.
    pub fn review(&mut self, now: Instant) -> Vec<ReviewAction> {
        let timeout = Duration::from_secs(RESPONSE_TIMEOUT_SECS);
        let mut actions = Vec::new();
        let mut to_evict = Vec::new();

        for bucket in &mut self.buckets {
            for node in bucket.nodes() {
                let idle = node.idle_for(now);
                if idle < timeout {
                    actions.push(ReviewAction::Ping {
                        hashed_id: node.hashed_id,
                        addr: node.addr,
                    });
                } else if node.goodness() == Goodness::Questionable {
                    to_evict.push(node.hashed_id);
                } else {
                    actions.push(ReviewAction::Ping {
                        hashed_id: node.hashed_id,
                        addr: node.addr,
                    });
                }
            }
            for node in bucket
                .nodes()
                .filter(|n| n.idle_for(now) >= timeout && n.goodness() == Goodness::Good)
                .map(|n| n.hashed_id)
                .collect::<Vec<_>>()
            {
                if let Some(n) = bucket.get_mut(&node) {
                    n.mark_questionable();
                }
            }
        }

        for hashed_id in to_evict {
            self.delete(&hashed_id);
            actions.push(ReviewAction::Evicted { hashed_id });
        }

        actions
    }

    /// Neighbourhood maintenance target: a random id in the
    /// self-bucket (last bucket) range, for the caller to launch a find_node
    /// search against.
    pub fn neighbourhood_maintenance_target(&self) -> NodeId {
        let last = self.last_bucket_index();
        id::gen_id_in_bucket(last, &self.self_hashed_id)
    }

    /// Bucket maintenance targets: every bucket with
    /// `age >= 15 min` or `size < 6` gets a random id in its own range.
    pub fn bucket_maintenance_targets(&self, now: Instant) -> Vec<MaintenanceTarget> {
        let stale_age = Duration::from_secs(RESPONSE_TIMEOUT_SECS);
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.age(now) >= stale_age || b.size() < crate::BUCKET_MIN_SIZE)
            .map(|(i, _)| MaintenanceTarget {
                bucket_index: i,
                target: id::gen_id_in_bucket(i, &self.self_hashed_id),
            })
            .collect()
    }
}

//! Iterative search engine.
//!
//! A plain, non-async state machine advanced by explicit caller calls,
//! covering the seven query types and the two-phase publish protocol
//! store/store_name/announce_peer need.
//! `Search` never touches a socket; the owning task (in [`crate::dispatcher`])
//! drives it by calling [`Search::next_batch`], sending what it returns, and
//! feeding replies back through [`Search::on_response`]/[`Search::on_timeout`].

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crisscross_crypto::schnorr::Signature;

use crate::codec::Tid;
use crate::id::{self, Address, NodeId};
use crate::{ALPHA, K, KNOWN_CAP};

/// A candidate or replied peer, as seen by a search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub hashed_id: NodeId,
    pub addr: Address,
}

/// Which of the seven query types this search is driving, plus the
/// type-specific payload needed to synthesize the query.
#[derive(Clone, Debug)]
pub enum SearchKind {
    FindNode,
    FindValue,
    FindName { generation: u64 },
    GetPeers,
    Store { value: Vec<u8>, ttl: u64, sig: Signature },
    StoreName {
        value: Vec<u8>,
        ttl: u64,
        generation: u64,
        owner_pubkey: [u8; 32],
        sig_ns: Signature,
        sig_cluster: Option<Signature>,
    },
    AnnouncePeer {
        port: Option<u16>,
        meta: Option<Vec<u8>>,
        ttl: Option<u64>,
    },
}

impl SearchKind {
    /// Two-phase kinds run a find_node-like convergence phase, then a
    /// direct-write phase to every node in `best_k`.
    pub fn is_two_phase(&self) -> bool {
        matches!(
            self,
            SearchKind::Store { .. } | SearchKind::StoreName { .. } | SearchKind::AnnouncePeer { .. }
        )
    }
}

/// What a response to a pending query carried (already decoded by the
/// dispatcher from the wire `ResponseArgs`).
pub enum ResponsePayload {
    /// A `nodes`/`nodes6` reply: continue iterating.
    Nodes(Vec<Candidate>),
    /// A hit: deliver to the caller and terminate (single-phase kinds only).
    Hit(Hit),
    /// A `wrote` reply from a publish-phase target.
    Wrote(bool),
}

/// The value delivered to the caller on a successful find_value / find_name
/// / get_peers hit.
#[derive(Clone, Debug)]
pub enum Hit {
    Value(Vec<u8>),
    NameRecord { value: Vec<u8>, generation: u64 },
    Peers(Vec<Address>),
}

/// The terminal outcome of a completed search.
#[derive(Clone, Debug)]
pub enum SearchResult {
    /// find_value / find_name / get_peers: a hit was delivered.
    Found(Hit),
    /// find_value / find_name / get_peers: `known` was exhausted with no hit.
    NotFound,
    /// find_node / maintenance: the k closest replied nodes.
    ClosestNodes(Vec<Candidate>),
    /// store / store_name / announce_peer: how many publish targets
    /// acknowledged the write.
    Published { acked: usize, attempted: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Lookup,
    Publish,
}

struct KnownEntry {
    candidate: Candidate,
    distance: NodeId,
    queried: bool,
}

struct PendingQuery {
    candidate: Candidate,
    deadline: Instant,
}

/// A single in-flight iterative lookup or two-phase publish.
pub struct Search {
    kind: SearchKind,
    target: NodeId,
    known: Vec<KnownEntry>,
    queried: HashSet<NodeId>,
    pending: HashMap<Tid, PendingQuery>,
    best_k: Vec<Candidate>,
    phase: Phase,
    publish_targets: Vec<Candidate>,
    publish_acked: HashSet<NodeId>,
    deadline: Instant,
    result: Option<SearchResult>,
}

impl Search {
    /// Create and seed a search from the routing table's initial candidates.
    pub fn new(kind: SearchKind, target: NodeId, start_nodes: Vec<Candidate>, deadline: Instant) -> Self {
        let mut search = Self {
            kind,
            target,
            known: Vec::new(),
            queried: HashSet::new(),
            pending: HashMap::new(),
            best_k: Vec::new(),
            phase: Phase::Lookup,
            publish_targets: Vec::new(),
            publish_acked: HashSet::new(),
            deadline,
            result: None,
        };
        search.merge_known(start_nodes);
        search
    }

    fn merge_known(&mut self, candidates: Vec<Candidate>) {
        for candidate in candidates {
            if self.queried.contains(&candidate.hashed_id) {
                continue;
            }
            if self.known.iter().any(|e| e.candidate.hashed_id == candidate.hashed_id) {
                continue;
            }
            let distance = id::xor(&candidate.hashed_id, &self.target);
            self.known.push(KnownEntry {
                candidate,
                distance,
                queried: false,
            });
        }
        self.known.sort_by(|a, b| a.distance.cmp(&b.distance));
        self.known.truncate(KNOWN_CAP);
    }

    fn record_replied(&mut self, candidate: Candidate) {
        if self.best_k.iter().any(|c| c.hashed_id == candidate.hashed_id) {
            return;
        }
        self.best_k.push(candidate);
        self.best_k
            .sort_by(|a, b| id::xor_cmp(&a.hashed_id, &b.hashed_id, &self.target));
        self.best_k.truncate(K);
    }

    /// Pop up to `alpha`-minus-in-flight unqueried candidates to query next.
    /// In the publish phase, returns any not-yet-sent
    /// publish targets instead (up to the same budget).
    pub fn next_batch(&mut self) -> Vec<Candidate> {
        if self.is_terminated() {
            return Vec::new();
        }
        let budget = ALPHA.saturating_sub(self.pending.len());
        if budget == 0 {
            return Vec::new();
        }

        match self.phase {
            Phase::Lookup => {
                let mut batch = Vec::with_capacity(budget);
                for entry in self.known.iter_mut() {
                    if batch.len() >= budget {
                        break;
                    }
                    if !entry.queried {
                        entry.queried = true;
                        self.queried.insert(entry.candidate.hashed_id);
                        batch.push(entry.candidate);
                    }
                }
                batch
            }
            Phase::Publish => {
                let batch: Vec<Candidate> = self
                    .publish_targets
                    .iter()
                    .filter(|c| !self.publish_acked.contains(&c.hashed_id) && !self.queried.contains(&c.hashed_id))
                    .take(budget)
                    .copied()
                    .collect();
                for c in &batch {
                    self.queried.insert(c.hashed_id);
                }
                batch
            }
        }
    }

    /// Record that `candidate` was just sent a query with transaction id
    /// `tid`, with the given per-query deadline.
    pub fn mark_pending(&mut self, tid: Tid, candidate: Candidate, now: Instant, query_timeout: Duration) {
        self.pending.insert(
            tid,
            PendingQuery {
                candidate,
                deadline: now + query_timeout,
            },
        );
    }

    /// Apply a response matching a pending tid.
    /// Returns `true` if the search produced a terminal result this call.
    pub fn on_response(&mut self, tid: Tid, payload: ResponsePayload) -> bool {
        let Some(pending) = self.pending.remove(&tid) else {
            return false; // unsolicited / duplicate: ignored.
        };
        self.record_replied(pending.candidate);

        match payload {
            ResponsePayload::Nodes(nodes) => {
                self.merge_known(nodes);
            }
            ResponsePayload::Hit(hit) => {
                if !self.kind.is_two_phase() {
                    self.result = Some(SearchResult::Found(hit));
                    return true;
                }
            }
            ResponsePayload::Wrote(true) => {
                self.publish_acked.insert(pending.candidate.hashed_id);
            }
            ResponsePayload::Wrote(false) => {}
        }

        self.maybe_advance_phase();
        self.check_termination()
    }

    /// Drop an expired pending query without re-querying its node or
    /// admitting it to `best_k`.
    pub fn on_timeout(&mut self, tid: Tid) -> bool {
        self.pending.remove(&tid);
        self.maybe_advance_phase();
        self.check_termination()
    }

    /// Expire any pending queries whose deadline has passed, returning their
    /// transaction ids (the caller should stop waiting on these).
    pub fn expire_timeouts(&mut self, now: Instant) -> Vec<Tid> {
        let expired: Vec<Tid> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(tid, _)| *tid)
            .collect();
        for tid in &expired {
            self.pending.remove(tid);
        }
        expired
    }

    fn maybe_advance_phase(&mut self) {
        if self.phase == Phase::Publish || !self.kind.is_two_phase() {
            return;
        }
        // Phase 1 stabilises when no unqueried candidate remains closer than
        // the farthest entry in best_k and nothing is in flight.
        if self.lookup_converged() {
            self.publish_targets = self.best_k.clone();
            self.phase = Phase::Publish;
            self.queried.clear();
        }
    }

    fn lookup_converged(&self) -> bool {
        if !self.pending.is_empty() {
            return false;
        }
        let Some(farthest) = self.best_k.last() else {
            return self.known.iter().all(|e| e.queried);
        };
        !self.known.iter().any(|e| {
            !e.queried
                && id::xor_cmp(&e.candidate.hashed_id, &farthest.hashed_id, &self.target)
                    == std::cmp::Ordering::Less
        })
    }

    fn check_termination(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        match self.phase {
            Phase::Lookup if !self.kind.is_two_phase() => {
                let exhausted = self.pending.is_empty() && self.known.iter().all(|e| e.queried);
                if exhausted {
                    self.result = Some(match self.kind {
                        SearchKind::FindNode => SearchResult::ClosestNodes(self.best_k.clone()),
                        _ => SearchResult::NotFound,
                    });
                    true
                } else {
                    false
                }
            }
            Phase::Publish => {
                let complete = self.pending.is_empty()
                    && self
                        .publish_targets
                        .iter()
                        .all(|c| self.publish_acked.contains(&c.hashed_id) || self.queried.contains(&c.hashed_id));
                if complete {
                    self.result = Some(SearchResult::Published {
                        acked: self.publish_acked.len(),
                        attempted: self.publish_targets.len(),
                    });
                    true
                } else {
                    false
                }
            }
            Phase::Lookup => false,
        }
    }

    /// Whether the overall deadline has elapsed.
    pub fn deadline_elapsed(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Force termination (deadline elapsed or external cancellation).
    pub fn force_terminate(&mut self) {
        if self.result.is_none() {
            self.result = Some(match self.phase {
                Phase::Publish => SearchResult::Published {
                    acked: self.publish_acked.len(),
                    attempted: self.publish_targets.len(),
                },
                Phase::Lookup if matches!(self.kind, SearchKind::FindNode) => {
                    SearchResult::ClosestNodes(self.best_k.clone())
                }
                Phase::Lookup => SearchResult::NotFound,
            });
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<&SearchResult> {
        self.result.as_ref()
    }

    pub fn kind(&self) -> &SearchKind {
        &self.kind
    }

    pub fn target(&self) -> &NodeId {
        &self.target
    }
}

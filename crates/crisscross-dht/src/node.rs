//! Per-peer liveneess state.
//!
//! A `Node` is pure data: it has no socket of its own. The per-cluster UDP
//! socket is owned by the dispatcher, so the action of pinging a node is
//! exposed as a value the routing table hands back to its owning task
//! ([`crate::routing_table::ReviewAction`]), which the task then executes by
//! asking the dispatcher to send — `Node` itself never touches a socket.

use std::time::Instant;

use crate::id::{Address, NodeId};

/// A node's liveness classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Goodness {
    /// Has responded within the last [`crate::RESPONSE_TIMEOUT_SECS`].
    Good,
    /// Has not responded recently enough and is a review/eviction candidate.
    Questionable,
}

/// A peer known to the routing table.
#[derive(Clone, Debug)]
pub struct Node {
    /// The peer's user-supplied raw id.
    pub raw_id: NodeId,
    /// `SHA3-256(raw_id)`; the key used for all routing-table indexing.
    pub hashed_id: NodeId,
    /// The peer's UDP address.
    pub addr: Address,
    /// The bucket this node currently resides in.
    pub bucket_index: usize,
    /// Monotonic timestamp of the last response received from this peer.
    pub last_responded: Instant,
    /// Current liveness classification.
    pub goodness: Goodness,
}

impl Node {
    /// Construct a freshly-discovered node, optimistically marked `Good`
    /// (it was just contacted as part of accepting it into the table).
    pub fn new(raw_id: NodeId, hashed_id: NodeId, addr: Address, bucket_index: usize) -> Self {
        Self {
            raw_id,
            hashed_id,
            addr,
            bucket_index,
            last_responded: Instant::now(),
            goodness: Goodness::Good,
        }
    }

    /// Mark that a response was just received: goodness becomes `Good` and
    /// the liveness clock resets.
    pub fn mark_responded(&mut self) {
        self.goodness = Goodness::Good;
        self.last_responded = Instant::now();
    }

    /// Downgrade this node to `Questionable` without resetting its clock.
    pub fn mark_questionable(&mut self) {
        self.goodness = Goodness::Questionable;
    }

    /// Current goodness classification.
    pub fn goodness(&self) -> Goodness {
        self.goodness
    }

    /// How long since this node last responded.
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_responded)
    }
}

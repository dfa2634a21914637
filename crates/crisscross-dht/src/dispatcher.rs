//! Server/dispatcher: one UDP socket per cluster.
//!
//! Owns the socket, the routing table, the token minter, and the set of
//! in-flight searches. Runs as a single Tokio task; nothing here holds a
//! lock across an `.await`. A single owner task plus a tid-to-search routing
//! map, rather than one process per peer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crisscross_crypto::schnorr::{Signature, VerifyingKey};
use crisscross_storage::Storage;

use crate::codec::{self, Family, Message, QueryArgs, QueryMethod, ResponseArgs, Tid, TidGenerator};
use crate::envelope::{self, ClusterId};
use crate::id::{self, Address, NodeId};
use crate::records;
use crate::routing_table::{ReviewAction, RoutingTable};
use crate::search::{Candidate, Hit, ResponsePayload, Search, SearchKind, SearchResult};
use crate::token::TokenMinter;
use crate::{DhtError, Result, QUERY_TIMEOUT_SECS};

/// Per-cluster write/read-gate key material.
pub struct ClusterContext {
    pub cluster_id: ClusterId,
    pub secret: [u8; 32],
    /// Public key authorizing `store`/`store_name` writes, if this cluster
    /// is write-gated.
    pub write_key: Option<VerifyingKey>,
}

/// Overridable maintenance timer intervals. Neighbourhood and bucket maintenance get up to 100%
/// additional uniform jitter applied on top of their base interval on every
/// firing; review does not.
#[derive(Clone, Copy, Debug)]
pub struct Intervals {
    pub review: Duration,
    pub neighbourhood: Duration,
    pub bucket_maintenance: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            review: Duration::from_secs(crate::REVIEW_INTERVAL_SECS),
            neighbourhood: Duration::from_secs(crate::NEIGHBOURHOOD_INTERVAL_SECS),
            bucket_maintenance: Duration::from_secs(crate::BUCKET_MAINTENANCE_INTERVAL_SECS),
        }
    }
}

/// Stretch `base` by a uniform random factor in `[1.0, 2.0)`: "up to 100%
/// uniform jitter".
fn jittered(base: Duration) -> Duration {
    base.mul_f64(1.0 + rand::random::<f64>())
}

/// Handle identifying one in-flight [`Search`].
pub type SearchId = u64;

struct SearchEntry {
    search: Search,
    completion: Option<oneshot::Sender<SearchResult>>,
}

/// The per-cluster dispatcher: owns the socket and demuxes traffic between
/// the routing table, storage, and in-flight searches.
pub struct Dispatcher<S: Storage> {
    socket: Arc<UdpSocket>,
    self_raw_id: NodeId,
    cluster: ClusterContext,
    storage: S,
    routing_table: RoutingTable,
    tid_gen: TidGenerator,
    token_minter: TokenMinter,
    /// tid -> which search is waiting on it.
    pending_tids: HashMap<Tid, SearchId>,
    searches: HashMap<SearchId, SearchEntry>,
    next_search_id: SearchId,
    /// tid -> waiter for a bare `ping` sent outside any search (bootstrap's
    /// initial seed contact).
    pings: HashMap<Tid, oneshot::Sender<NodeId>>,
    intervals: Intervals,
}

impl<S: Storage> Dispatcher<S> {
    pub fn new(self_raw_id: NodeId, cluster: ClusterContext, socket: UdpSocket, storage: S) -> Self {
        Self {
            socket: Arc::new(socket),
            routing_table: RoutingTable::new(self_raw_id),
            self_raw_id,
            cluster,
            storage,
            tid_gen: TidGenerator::new(),
            token_minter: TokenMinter::new(),
            pending_tids: HashMap::new(),
            searches: HashMap::new(),
            next_search_id: 0,
            pings: HashMap::new(),
            intervals: Intervals::default(),
        }
    }

    /// Override the maintenance timer intervals. Consumed by
    /// `crisscross-daemon`'s config loader.
    pub fn with_intervals(mut self, intervals: Intervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn routing_table_mut(&mut self) -> &mut RoutingTable {
        &mut self.routing_table
    }

    /// Send a bare `ping`, outside of any search, returning a handle for the
    /// replying node's raw id.
    pub fn ping(&mut self, addr: Address) -> oneshot::Receiver<NodeId> {
        let tid = self.tid_gen.next();
        let message = Message::Query {
            t: tid,
            q: QueryMethod::Ping,
            a: QueryArgs {
                id: self.self_raw_id,
                ..Default::default()
            },
        };
        let (tx, rx) = oneshot::channel();
        if self.send_to(&message, addr).is_ok() {
            self.pings.insert(tid, tx);
        }
        rx
    }

    /// Service inbound datagrams while racing `fut` to completion. Used
    /// during bootstrap, before [`Dispatcher::run`] has taken ownership of
    /// the socket's receive loop.
    pub async fn drive_until<T>(&mut self, fut: impl std::future::Future<Output = T>) -> T {
        tokio::pin!(fut);
        let mut recv_buf = vec![0u8; 2048];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut recv_buf) => {
                    match received {
                        Ok((len, from)) => self.handle_datagram(&recv_buf[..len], from).await,
                        Err(err) => warn!(error = %err, "udp recv failed"),
                    }
                }
                out = &mut fut => return out,
            }
        }
    }

    /// Drive the cluster: receive datagrams and fire the liveness review,
    /// neighbourhood maintenance, bucket maintenance, and search-timeout
    /// timers. Runs until the socket errors out.
    pub async fn run(mut self) -> Result<()> {
        let mut recv_buf = vec![0u8; 2048];
        let mut review_timer = tokio::time::interval(self.intervals.review);
        let mut timeout_timer = tokio::time::interval(Duration::from_secs(1));
        let mut neighbourhood_sleep = Box::pin(tokio::time::sleep(jittered(self.intervals.neighbourhood)));
        let mut bucket_sleep = Box::pin(tokio::time::sleep(jittered(self.intervals.bucket_maintenance)));

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut recv_buf) => {
                    match received {
                        Ok((len, from)) => self.handle_datagram(&recv_buf[..len], from).await,
                        Err(err) => warn!(error = %err, "udp recv failed"),
                    }
                }
                _ = review_timer.tick() => self.run_review(Instant::now()),
                _ = &mut neighbourhood_sleep => {
                    self.run_neighbourhood_maintenance();
                    neighbourhood_sleep.as_mut().reset(tokio::time::Instant::now() + jittered(self.intervals.neighbourhood));
                }
                _ = &mut bucket_sleep => {
                    self.run_bucket_maintenance(Instant::now());
                    bucket_sleep.as_mut().reset(tokio::time::Instant::now() + jittered(self.intervals.bucket_maintenance));
                }
                _ = timeout_timer.tick() => self.expire_timeouts(Instant::now()),
            }
            self.token_minter.maybe_rotate(Instant::now());
        }
    }

    fn run_review(&mut self, now: Instant) {
        for action in self.routing_table.review(now) {
            if let ReviewAction::Ping { addr, .. } = action {
                let tid = self.tid_gen.next();
                let message = Message::Query {
                    t: tid,
                    q: QueryMethod::Ping,
                    a: QueryArgs {
                        id: self.self_raw_id,
                        ..Default::default()
                    },
                };
                let _ = self.send_to(&message, addr);
            }
        }
    }

    fn run_neighbourhood_maintenance(&mut self) {
        let target = self.routing_table.neighbourhood_maintenance_target();
        self.launch_search(SearchKind::FindNode, target, Instant::now() + Duration::from_secs(30));
    }

    fn run_bucket_maintenance(&mut self, now: Instant) {
        let targets = self.routing_table.bucket_maintenance_targets(now);
        for mt in targets {
            self.launch_search(SearchKind::FindNode, mt.target, Instant::now() + Duration::from_secs(30));
        }
    }

    /// Start an iterative search, returning a handle the caller can await
    /// for the terminal result.
    pub fn launch_search(
        &mut self,
        kind: SearchKind,
        target: NodeId,
        deadline: Instant,
    ) -> oneshot::Receiver<SearchResult> {
        let start_nodes: Vec<Candidate> = self
            .routing_table
            .closest_nodes(&target, None)
            .into_iter()
            .map(|n| Candidate {
                hashed_id: n.hashed_id,
                addr: n.addr,
            })
            .collect();

        let search = Search::new(kind, target, start_nodes, deadline);
        let id = self.next_search_id;
        self.next_search_id += 1;
        let (tx, rx) = oneshot::channel();
        self.searches.insert(
            id,
            SearchEntry {
                search,
                completion: Some(tx),
            },
        );
        self.drive_search(id);
        rx
    }

    /// Pop the next batch of queries a search wants to send and dispatch
    /// them.
    fn drive_search(&mut self, id: SearchId) {
        let Some(entry) = self.searches.get_mut(&id) else {
            return;
        };
        let batch = entry.search.next_batch();
        for candidate in batch {
            let tid = self.tid_gen.next();
            let message = match build_query_for_search(&entry.search, &self.self_raw_id, tid) {
                Ok(m) => m,
                Err(err) => {
                    warn!(error = %err, "failed to build outbound query");
                    continue;
                }
            };
            if self.send_to(&message, candidate.addr).is_ok() {
                entry
                    .search
                    .mark_pending(tid, candidate, Instant::now(), Duration::from_secs(QUERY_TIMEOUT_SECS));
                self.pending_tids.insert(tid, id);
            }
        }
        self.finalize_if_terminated(id);
    }

    fn finalize_if_terminated(&mut self, id: SearchId) {
        let terminated = self
            .searches
            .get(&id)
            .map(|e| e.search.is_terminated())
            .unwrap_or(false);
        if !terminated {
            return;
        }
        if let Some(mut entry) = self.searches.remove(&id) {
            if let Some(result) = entry.search.result().cloned() {
                if let Some(tx) = entry.completion.take() {
                    let _ = tx.send(result);
                }
            }
            self.pending_tids.retain(|_, v| *v != id);
        }
    }

    /// Expire any per-query deadlines that have passed across every active
    /// search.
    pub fn expire_timeouts(&mut self, now: Instant) {
        let ids: Vec<SearchId> = self.searches.keys().copied().collect();
        for id in ids {
            let expired = {
                let Some(entry) = self.searches.get_mut(&id) else {
                    continue;
                };
                entry.search.expire_timeouts(now)
            };
            for tid in expired {
                self.pending_tids.remove(&tid);
            }
            if self
                .searches
                .get(&id)
                .map(|e| e.search.deadline_elapsed(now))
                .unwrap_or(false)
            {
                if let Some(entry) = self.searches.get_mut(&id) {
                    entry.search.force_terminate();
                }
            }
            self.drive_search(id);
        }
    }

    /// Accept `raw_id`/`addr` as freshly observed from incoming traffic: a
    /// brand-new peer is inserted, an already-known one has its liveness
    /// clock refreshed.
    fn touch(&mut self, raw_id: NodeId, addr: Address) {
        use crate::routing_table::InsertOutcome;
        if self.routing_table.insert(raw_id, addr) == InsertOutcome::AlreadyPresent {
            self.routing_table.mark_responded(&id::hash_id(&raw_id));
        }
    }

    fn send_to(&self, message: &Message, addr: Address) -> Result<()> {
        let body = codec::encode(message)?;
        let datagram = envelope::seal(&self.cluster.cluster_id, &self.cluster.secret, &body)?;
        let socket = self.socket.clone();
        tokio::spawn(async move {
            if let Err(err) = socket.send_to(&datagram, addr).await {
                warn!(error = %err, "udp send failed");
            }
        });
        Ok(())
    }

    /// Handle one inbound datagram.
    pub async fn handle_datagram(&mut self, datagram: &[u8], from: Address) {
        let Some(framed) = envelope::strip_framing(datagram) else {
            debug!("dropping datagram with invalid framing");
            return;
        };
        if framed.cluster_id != self.cluster.cluster_id {
            debug!("dropping datagram for unknown cluster");
            return;
        }
        let body = match envelope::open(&self.cluster.secret, framed.sealed_body) {
            Ok(body) => body,
            Err(_) => {
                debug!("dropping datagram that failed to open");
                return;
            }
        };
        let message = match codec::decode(&body) {
            Ok(m) => m,
            Err(_) => {
                debug!("dropping datagram with malformed body");
                return;
            }
        };

        match message {
            Message::Query { t, q, a } => self.handle_query(t, q, a, from).await,
            Message::Response { t, r } => self.handle_response(t, r, from),
            Message::Error { t, .. } => self.handle_error(t),
        }
    }

    fn handle_error(&mut self, tid: Tid) {
        if let Some(id) = self.pending_tids.remove(&tid) {
            if let Some(entry) = self.searches.get_mut(&id) {
                entry.search.on_timeout(tid);
            }
            self.drive_search(id);
        }
    }

    fn handle_response(&mut self, tid: Tid, r: ResponseArgs, from: Address) {
        self.touch(r.id, from);

        if let Some(tx) = self.pings.remove(&tid) {
            let _ = tx.send(r.id);
            return;
        }

        let Some(id) = self.pending_tids.remove(&tid) else {
            debug!("dropping response for unknown tid");
            return;
        };

        let Some(entry) = self.searches.get_mut(&id) else {
            return;
        };
        let payload = decode_response_payload(entry.search.kind(), &r);
        entry.search.on_response(tid, payload);
        self.drive_search(id);
    }

    async fn handle_query(&mut self, tid: Tid, q: QueryMethod, a: QueryArgs, from: Address) {
        self.touch(a.id, from);

        let reply = match q {
            QueryMethod::Ping => Some(ResponseArgs {
                id: self.self_raw_id,
                ..Default::default()
            }),
            QueryMethod::FindNode => Some(self.reply_find_node(&a, from)),
            QueryMethod::FindValue => Some(self.reply_find_value(&a, from).await),
            QueryMethod::FindName => Some(self.reply_find_name(&a, from).await),
            QueryMethod::GetPeers => Some(self.reply_get_peers(&a, from).await),
            QueryMethod::Store => Some(self.reply_store(&a).await),
            QueryMethod::StoreName => Some(self.reply_store_name(&a).await),
            QueryMethod::AnnouncePeer => Some(self.reply_announce_peer(&a, from).await),
        };

        if let Some(r) = reply {
            let message = Message::Response { t: tid, r };
            let _ = self.send_to(&message, from);
        }
    }

    fn reply_find_node(&self, a: &QueryArgs, from: Address) -> ResponseArgs {
        let target = a.target.unwrap_or(a.id);
        let exclude_hashed = id::hash_id(&a.id);
        let closest = self.routing_table.closest_nodes(&target, Some(&exclude_hashed));
        let families = a.want.clone().unwrap_or(vec![Family::V4]);

        let mut r = ResponseArgs {
            id: self.self_raw_id,
            ..Default::default()
        };
        if families.contains(&Family::V4) {
            let v4: Vec<(NodeId, Address)> = closest
                .iter()
                .filter(|n| n.addr.is_ipv4())
                .map(|n| (n.hashed_id, n.addr))
                .collect();
            r.nodes = Some(codec::encode_compact_nodes(
                v4.iter().map(|(id, addr)| (id, addr)),
                Family::V4,
            ));
        }
        if families.contains(&Family::V6) {
            let v6: Vec<(NodeId, Address)> = closest
                .iter()
                .filter(|n| n.addr.is_ipv6())
                .map(|n| (n.hashed_id, n.addr))
                .collect();
            r.nodes6 = Some(codec::encode_compact_nodes(
                v6.iter().map(|(id, addr)| (id, addr)),
                Family::V6,
            ));
        }
        r
    }

    async fn reply_find_value(&mut self, a: &QueryArgs, from: Address) -> ResponseArgs {
        let Some(key) = a.key else {
            return self.reply_find_node(a, from);
        };
        match self.storage.get(self.cluster.cluster_id, key).await {
            Some(entry) => ResponseArgs {
                id: self.self_raw_id,
                value: Some(entry.value),
                token: Some(self.token_minter.mint(from.ip(), &key).to_vec()),
                ..Default::default()
            },
            None => self.reply_find_node(a, from),
        }
    }

    async fn reply_find_name(&mut self, a: &QueryArgs, from: Address) -> ResponseArgs {
        let Some(name) = a.name else {
            return self.reply_find_node(a, from);
        };
        let requested_gen = a.generation.unwrap_or(0);
        match self.storage.get_name(self.cluster.cluster_id, name).await {
            Some(entry) if entry.generation >= requested_gen => ResponseArgs {
                id: self.self_raw_id,
                value: Some(entry.value),
                generation: Some(entry.generation),
                token: Some(self.token_minter.mint(from.ip(), &name).to_vec()),
                ..Default::default()
            },
            _ => self.reply_find_node(a, from),
        }
    }

    async fn reply_get_peers(&mut self, a: &QueryArgs, from: Address) -> ResponseArgs {
        let Some(hash) = a.hash else {
            return self.reply_find_node(a, from);
        };
        let peers = self.storage.get_peers(self.cluster.cluster_id, hash).await;
        if peers.is_empty() {
            return self.reply_find_node(a, from);
        }
        ResponseArgs {
            id: self.self_raw_id,
            values: Some(peers.iter().map(|addr| addr.to_string().into_bytes()).collect()),
            token: Some(self.token_minter.mint(from.ip(), &hash).to_vec()),
            ..Default::default()
        }
    }

    async fn reply_store(&mut self, a: &QueryArgs) -> ResponseArgs {
        let wrote = self.try_store(a).await.is_ok();
        ResponseArgs {
            id: self.self_raw_id,
            wrote: Some(wrote),
            ..Default::default()
        }
    }

    async fn try_store(&mut self, a: &QueryArgs) -> Result<()> {
        let key = a.key.ok_or_else(|| DhtError::Codec("store missing key".into()))?;
        let value = a.value.clone().ok_or_else(|| DhtError::Codec("store missing value".into()))?;
        let ttl = a.ttl.ok_or_else(|| DhtError::Codec("store missing ttl".into()))?;
        let sig = parse_signature(a.sig.as_deref().ok_or_else(|| DhtError::Codec("store missing sig".into()))?)?;
        let write_key = self.cluster.write_key.ok_or(DhtError::InvalidSignature)?;
        records::verify_value_store(&key, &value, ttl, &sig, &write_key)?;
        self.storage.put(self.cluster.cluster_id, key, value, ttl).await;
        Ok(())
    }

    async fn reply_store_name(&mut self, a: &QueryArgs) -> ResponseArgs {
        let wrote = self.try_store_name(a).await.is_ok();
        ResponseArgs {
            id: self.self_raw_id,
            wrote: Some(wrote),
            ..Default::default()
        }
    }

    async fn try_store_name(&mut self, a: &QueryArgs) -> Result<()> {
        let name = a.name.ok_or_else(|| DhtError::Codec("store_name missing name".into()))?;
        let value = a.value.clone().ok_or_else(|| DhtError::Codec("store_name missing value".into()))?;
        let ttl = a.ttl.ok_or_else(|| DhtError::Codec("store_name missing ttl".into()))?;
        let generation = a.generation.ok_or_else(|| DhtError::Codec("store_name missing gen".into()))?;
        let owner_bytes = a
            .owner_pubkey
            .ok_or_else(|| DhtError::Codec("store_name missing priv".into()))?;
        let owner_key = VerifyingKey::from_bytes(&owner_bytes)?;
        let sig_ns = parse_signature(
            a.sig_ns.as_deref().ok_or_else(|| DhtError::Codec("store_name missing sig_ns".into()))?,
        )?;
        let sig_cluster = a.sig.as_deref().map(parse_signature).transpose()?;

        let stored_generation = self
            .storage
            .get_name(self.cluster.cluster_id, name)
            .await
            .map(|e| e.generation);

        records::verify_name_store(
            &name,
            &value,
            ttl,
            generation,
            &owner_key,
            &sig_ns,
            self.cluster.write_key.as_ref(),
            sig_cluster.as_ref(),
            stored_generation,
        )?;

        self.storage
            .put_name(self.cluster.cluster_id, name, value, generation, ttl)
            .await;
        Ok(())
    }

    async fn reply_announce_peer(&mut self, a: &QueryArgs, from: Address) -> ResponseArgs {
        let wrote = self.try_announce(a, from).await;
        ResponseArgs {
            id: self.self_raw_id,
            wrote: Some(wrote),
            ..Default::default()
        }
    }

    async fn try_announce(&mut self, a: &QueryArgs, from: Address) -> bool {
        let Some(hash) = a.hash else {
            return false;
        };
        let Some(token) = a.token.as_deref() else {
            return false;
        };
        if token.len() != 8 {
            return false;
        }
        let mut token_arr = [0u8; 8];
        token_arr.copy_from_slice(token);
        if !self.token_minter.validate(&token_arr, from.ip(), &hash) {
            return false;
        }
        let port = a.port.unwrap_or(from.port());
        let addr = SocketAddr::new(from.ip(), port);
        let ttl = a.ttl.unwrap_or(3600);
        self.storage
            .announce(self.cluster.cluster_id, hash, addr, a.meta.clone(), ttl)
            .await;
        true
    }
}

fn parse_signature(bytes: &[u8]) -> Result<Signature> {
    if bytes.len() != 64 {
        return Err(DhtError::Codec("signature must be 64 bytes".into()));
    }
    let mut arr = [0u8; 64];
    arr.copy_from_slice(bytes);
    Ok(Signature::from_bytes(&arr))
}

fn build_query_for_search(search: &Search, self_raw_id: &NodeId, tid: Tid) -> Result<Message> {
    let base = QueryArgs {
        id: *self_raw_id,
        ..Default::default()
    };
    let (q, a) = match search.kind() {
        SearchKind::FindNode => (
            QueryMethod::FindNode,
            QueryArgs {
                target: Some(*search.target()),
                want: Some(vec![Family::V4, Family::V6]),
                ..base
            },
        ),
        SearchKind::FindValue => (
            QueryMethod::FindValue,
            QueryArgs {
                key: Some(*search.target()),
                ..base
            },
        ),
        SearchKind::FindName { generation } => (
            QueryMethod::FindName,
            QueryArgs {
                name: Some(*search.target()),
                generation: Some(*generation),
                ..base
            },
        ),
        SearchKind::GetPeers => (
            QueryMethod::GetPeers,
            QueryArgs {
                hash: Some(*search.target()),
                ..base
            },
        ),
        SearchKind::Store { value, ttl, sig } => (
            QueryMethod::Store,
            QueryArgs {
                key: Some(*search.target()),
                value: Some(value.clone()),
                ttl: Some(*ttl),
                sig: Some(sig.to_bytes().to_vec()),
                ..base
            },
        ),
        SearchKind::StoreName {
            value,
            ttl,
            generation,
            owner_pubkey,
            sig_ns,
            sig_cluster,
        } => (
            QueryMethod::StoreName,
            QueryArgs {
                name: Some(*search.target()),
                value: Some(value.clone()),
                ttl: Some(*ttl),
                generation: Some(*generation),
                owner_pubkey: Some(*owner_pubkey),
                sig_ns: Some(sig_ns.to_bytes().to_vec()),
                sig: sig_cluster.as_ref().map(|s| s.to_bytes().to_vec()),
                ..base
            },
        ),
        SearchKind::AnnouncePeer { port, meta, ttl } => (
            QueryMethod::AnnouncePeer,
            QueryArgs {
                hash: Some(*search.target()),
                port: *port,
                meta: meta.clone(),
                ttl: *ttl,
                ..base
            },
        ),
    };
    Ok(Message::Query { t: tid, q, a })
}

fn decode_response_payload(kind: &SearchKind, r: &ResponseArgs) -> ResponsePayload {
    let mut nodes = Vec::new();
    if let Some(bytes) = &r.nodes {
        if let Ok(decoded) = codec::decode_compact_nodes(bytes, Family::V4) {
            nodes.extend(decoded.into_iter().map(|(hashed_id, addr)| Candidate { hashed_id, addr }));
        }
    }
    if let Some(bytes) = &r.nodes6 {
        if let Ok(decoded) = codec::decode_compact_nodes(bytes, Family::V6) {
            nodes.extend(decoded.into_iter().map(|(hashed_id, addr)| Candidate { hashed_id, addr }));
        }
    }

    match kind {
        SearchKind::Store { .. } | SearchKind::StoreName { .. } | SearchKind::AnnouncePeer { .. } => {
            ResponsePayload::Wrote(r.wrote.unwrap_or(false))
        }
        SearchKind::FindValue => match &r.value {
            Some(value) => ResponsePayload::Hit(Hit::Value(value.clone())),
            None => ResponsePayload::Nodes(nodes),
        },
        SearchKind::FindName { .. } => match (&r.value, r.generation) {
            (Some(value), Some(generation)) => ResponsePayload::Hit(Hit::NameRecord {
                value: value.clone(),
                generation,
            }),
            _ => ResponsePayload::Nodes(nodes),
        },
        SearchKind::GetPeers => match &r.values {
            Some(values) if !values.is_empty() => {
                let peers = values
                    .iter()
                    .filter_map(|v| std::str::from_utf8(v).ok().and_then(|s| s.parse().ok()))
                    .collect();
                ResponsePayload::Hit(Hit::Peers(peers))
            }
            _ => ResponsePayload::Nodes(nodes),
        },
        SearchKind::FindNode => ResponsePayload::Nodes(nodes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crisscross_storage::MemStorage;

    fn context(cluster_id: ClusterId, secret: [u8; 32]) -> ClusterContext {
        ClusterContext {
            cluster_id,
            secret,
            write_key: None,
        }
    }

    async fn bound_dispatcher(raw_id: NodeId, cluster: ClusterContext) -> Dispatcher<MemStorage> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind socket");
        Dispatcher::new(raw_id, cluster, socket, MemStorage::new())
    }

    #[test]
    fn test_jittered_stays_in_one_to_two_x_range() {
        let base = Duration::from_secs(60);
        for _ in 0..200 {
            let d = jittered(base);
            assert!(d >= base, "jittered duration must not be shorter than base");
            assert!(d < base * 2, "jittered duration must stay under 2x base");
        }
    }

    #[tokio::test]
    async fn test_ping_roundtrip_between_two_dispatchers() {
        let secret = [0x42u8; 32];
        let cluster_id = [0x01u8; 32];

        let mut a = bound_dispatcher([1u8; 32], context(cluster_id, secret)).await;
        let b = bound_dispatcher([2u8; 32], context(cluster_id, secret)).await;
        let b_addr = b.socket.local_addr().expect("local addr");

        let rx = a.ping(b_addr);

        // Service b's side: receive a's ping, answer with a pong.
        let mut buf = vec![0u8; 2048];
        let (len, from) = b.socket.recv_from(&mut buf).await.expect("recv");
        let mut b = b;
        b.handle_datagram(&buf[..len], from).await;

        // Deliver b's pong back to a.
        let (len, from) = a.socket.recv_from(&mut buf).await.expect("recv");
        a.handle_datagram(&buf[..len], from).await;

        let replied_id = rx.await.expect("ping answered");
        assert_eq!(replied_id, [2u8; 32]);
    }

    #[tokio::test]
    async fn test_unknown_cluster_datagram_is_dropped_silently() {
        let mut a = bound_dispatcher([1u8; 32], context([0x01u8; 32], [9u8; 32])).await;
        let wrong_cluster_datagram = envelope::seal(&[0xFFu8; 32], &[9u8; 32], b"irrelevant").expect("seal");
        let from: Address = "127.0.0.1:9".parse().expect("parse addr");
        // Must not panic; simply drops.
        a.handle_datagram(&wrong_cluster_datagram, from).await;
        assert_eq!(a.routing_table().size(), 0);
    }

    #[tokio::test]
    async fn test_store_then_find_value_hit() {
        let secret = [0x11u8; 32];
        let cluster_id = [0x22u8; 32];
        let kp = crisscross_crypto::schnorr::KeyPair::generate();

        let mut write_ctx = context(cluster_id, secret);
        write_ctx.write_key = Some(kp.verifying_key);
        let mut a = bound_dispatcher([1u8; 32], write_ctx).await;

        let key = [7u8; 32];
        let value = b"hello dht".to_vec();
        let ttl = 3600u64;
        let message = crisscross_crypto::combine::value_record_message(&key, &value, ttl);
        let sig = kp.signing_key.sign(&message);

        let store_args = QueryArgs {
            id: [9u8; 32],
            key: Some(key),
            value: Some(value.clone()),
            ttl: Some(ttl),
            sig: Some(sig.to_bytes().to_vec()),
            ..Default::default()
        };
        let reply = a.reply_store(&store_args).await;
        assert_eq!(reply.wrote, Some(true));

        let find_args = QueryArgs {
            id: [9u8; 32],
            key: Some(key),
            ..Default::default()
        };
        let from: Address = "127.0.0.1:12345".parse().expect("parse addr");
        let found = a.reply_find_value(&find_args, from).await;
        assert_eq!(found.value, Some(value));
        assert!(found.token.is_some());
    }

    #[tokio::test]
    async fn test_store_name_generation_conflict() {
        // Scenario E: store_name(gen=5) then store_name(gen=5) rejects;
        // store_name(gen=6) accepts.
        let secret = [0x33u8; 32];
        let cluster_id = [0x44u8; 32];
        let owner = crisscross_crypto::schnorr::KeyPair::generate();
        let mut a = bound_dispatcher([1u8; 32], context(cluster_id, secret)).await;

        let name = crate::records::name_for_pubkey(&owner.verifying_key.to_bytes());
        let make_args = |generation: u64| {
            let value = b"v".to_vec();
            let ttl = 3600u64;
            let owner_msg = crisscross_crypto::combine::name_record_owner_message(&name, &value, generation);
            let sig_ns = owner.signing_key.sign(&owner_msg);
            QueryArgs {
                id: [9u8; 32],
                name: Some(name),
                value: Some(value),
                ttl: Some(ttl),
                generation: Some(generation),
                owner_pubkey: Some(owner.verifying_key.to_bytes()),
                sig_ns: Some(sig_ns.to_bytes().to_vec()),
                ..Default::default()
            }
        };

        let first = a.reply_store_name(&make_args(5)).await;
        assert_eq!(first.wrote, Some(true));

        let repeat = a.reply_store_name(&make_args(5)).await;
        assert_eq!(repeat.wrote, Some(false));

        let advance = a.reply_store_name(&make_args(6)).await;
        assert_eq!(advance.wrote, Some(true));
    }

    #[tokio::test]
    async fn test_announce_then_get_peers_via_dispatcher() {
        let secret = [0x55u8; 32];
        let cluster_id = [0x66u8; 32];
        let mut a = bound_dispatcher([1u8; 32], context(cluster_id, secret)).await;

        let hash = [3u8; 32];
        let from: Address = "10.0.0.5:4000".parse().expect("parse addr");
        let token = a.token_minter.mint(from.ip(), &hash);

        let announce_args = QueryArgs {
            id: [9u8; 32],
            hash: Some(hash),
            token: Some(token.to_vec()),
            ttl: Some(3600),
            ..Default::default()
        };
        let reply = a.reply_announce_peer(&announce_args, from).await;
        assert_eq!(reply.wrote, Some(true));

        let get_peers_args = QueryArgs {
            id: [9u8; 32],
            hash: Some(hash),
            ..Default::default()
        };
        let peers_reply = a.reply_get_peers(&get_peers_args, from).await;
        assert!(peers_reply.values.is_some());
    }
}

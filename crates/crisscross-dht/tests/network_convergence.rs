//! Integration test: three-node bootstrap convergence over real loopback UDP.
//!
//! A toned-down, deterministic version of the full mesh-convergence scenario:
//! three dispatchers on `127.0.0.1`, each seeded with the other two, all
//! bootstrapping concurrently. Exercises `ping`, `find_node`, and routing
//! table insertion together rather than any one of them in isolation.

use std::time::Duration;

use tokio::net::UdpSocket;

use crisscross_dht::bootstrap::{bootstrap, BootstrapConfig};
use crisscross_dht::dispatcher::{ClusterContext, Dispatcher};
use crisscross_dht::id;
use crisscross_storage::MemStorage;

async fn node(cluster: ClusterContext) -> (Dispatcher<MemStorage>, std::net::SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind socket");
    let addr = socket.local_addr().expect("local addr");
    let (raw_id, _) = id::gen_node_id();
    (Dispatcher::new(raw_id, cluster, socket, MemStorage::new()), addr)
}

fn cluster() -> ClusterContext {
    ClusterContext {
        cluster_id: [0xAAu8; 32],
        secret: [0xBBu8; 32],
        write_key: None,
    }
}

#[tokio::test]
async fn three_node_bootstrap_converges() {
    let (mut a, addr_a) = node(cluster()).await;
    let (mut b, addr_b) = node(cluster()).await;
    let (mut c, addr_c) = node(cluster()).await;

    let cfg_a = BootstrapConfig {
        seed_addrs: vec![addr_b, addr_c],
        min_responsive_seeds: 1,
        ping_timeout: Duration::from_secs(2),
        lookup_timeout: Duration::from_secs(2),
    };
    let cfg_b = BootstrapConfig {
        seed_addrs: vec![addr_a, addr_c],
        min_responsive_seeds: 1,
        ping_timeout: Duration::from_secs(2),
        lookup_timeout: Duration::from_secs(2),
    };
    let cfg_c = BootstrapConfig {
        seed_addrs: vec![addr_a, addr_b],
        min_responsive_seeds: 1,
        ping_timeout: Duration::from_secs(2),
        lookup_timeout: Duration::from_secs(2),
    };

    // All three dispatchers must be driven concurrently: each one's inbound
    // pings/queries are only serviced while its own `drive_until` future is
    // being polled.
    let (result_a, result_b, result_c) = tokio::join!(
        bootstrap(&cfg_a, &mut a),
        bootstrap(&cfg_b, &mut b),
        bootstrap(&cfg_c, &mut c),
    );

    assert!(result_a.is_ok(), "node a should bootstrap: {result_a:?}");
    assert!(result_b.is_ok(), "node b should bootstrap: {result_b:?}");
    assert!(result_c.is_ok(), "node c should bootstrap: {result_c:?}");

    assert_eq!(result_a.expect("bootstrap a").responsive_seeds, 2);
    assert_eq!(result_b.expect("bootstrap b").responsive_seeds, 2);
    assert_eq!(result_c.expect("bootstrap c").responsive_seeds, 2);

    // Every node should now know about both peers.
    assert_eq!(a.routing_table().size(), 2);
    assert_eq!(b.routing_table().size(), 2);
    assert_eq!(c.routing_table().size(), 2);

    // A node never inserts itself.
    let self_id_a = *a.routing_table().self_hashed_id();
    assert!(a.routing_table().get(&self_id_a).is_none());
}

#[tokio::test]
async fn bootstrap_fails_when_no_seed_responds() {
    let (mut a, _addr_a) = node(cluster()).await;
    let dead_addr: std::net::SocketAddr = "127.0.0.1:1".parse().expect("parse addr");
    let cfg = BootstrapConfig {
        seed_addrs: vec![dead_addr],
        min_responsive_seeds: 1,
        ping_timeout: Duration::from_millis(200),
        lookup_timeout: Duration::from_millis(200),
    };
    let result = bootstrap(&cfg, &mut a).await;
    assert!(result.is_err(), "bootstrap against an unreachable seed must fail");
}

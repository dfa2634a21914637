//! Integration test: publish a value on one node, read it back through a
//! `find_value` search from the same node, over real loopback UDP. Drives
//! the actual two-phase network publish protocol instead of calling a
//! record store directly.

use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use crisscross_crypto::combine;
use crisscross_crypto::schnorr::KeyPair;
use crisscross_dht::dispatcher::{ClusterContext, Dispatcher};
use crisscross_dht::id;
use crisscross_dht::search::{SearchKind, SearchResult};
use crisscross_storage::MemStorage;

async fn node(cluster: ClusterContext) -> (Dispatcher<MemStorage>, std::net::SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind socket");
    let addr = socket.local_addr().expect("local addr");
    let (raw_id, _) = id::gen_node_id();
    (Dispatcher::new(raw_id, cluster, socket, MemStorage::new()), addr)
}

#[tokio::test]
async fn store_then_find_value_round_trips_over_the_network() {
    let kp = KeyPair::generate();
    let cluster = |write_key| ClusterContext {
        cluster_id: [0x11u8; 32],
        secret: [0x22u8; 32],
        write_key,
    };

    let (mut a, _a_addr) = node(cluster(Some(kp.verifying_key))).await;
    let (mut b, b_addr) = node(cluster(Some(kp.verifying_key))).await;

    let b_raw_id = *b.routing_table().self_raw_id();
    a.routing_table_mut().insert(b_raw_id, b_addr);

    let key = [0x77u8; 32];
    let value = b"integration-test-value".to_vec();
    let ttl = 3600u64;
    let message = combine::value_record_message(&key, &value, ttl);
    let sig = kp.signing_key.sign(&message);

    let store_kind = SearchKind::Store {
        value: value.clone(),
        ttl,
        sig,
    };
    let store_rx = a.launch_search(store_kind, key, Instant::now() + Duration::from_secs(3));
    let b_drive = b.drive_until(tokio::time::sleep(Duration::from_millis(400)));
    let (store_result, _) = tokio::join!(
        a.drive_until(tokio::time::timeout(Duration::from_secs(3), store_rx)),
        b_drive,
    );
    let store_result = store_result.expect("store did not time out").expect("store channel closed");
    match store_result {
        SearchResult::Published { acked, attempted } => {
            assert!(acked >= 1, "at least one node should have acked the store");
            assert!(acked <= attempted);
        }
        other => panic!("expected Published, got {other:?}"),
    }

    let find_rx = a.launch_search(SearchKind::FindValue, key, Instant::now() + Duration::from_secs(3));
    let b_drive = b.drive_until(tokio::time::sleep(Duration::from_millis(400)));
    let (find_result, _) = tokio::join!(
        a.drive_until(tokio::time::timeout(Duration::from_secs(3), find_rx)),
        b_drive,
    );
    let find_result = find_result.expect("find_value did not time out").expect("find_value channel closed");
    match find_result {
        SearchResult::Found(crisscross_dht::search::Hit::Value(found_value)) => {
            assert_eq!(found_value, value);
        }
        other => panic!("expected Found(Value), got {other:?}"),
    }
}

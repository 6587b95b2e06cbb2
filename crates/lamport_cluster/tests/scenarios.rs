//! Multi-node scenarios over the in-process transport.

use lamport_cluster::{CsPhase, LocalNetwork, Node, NodeConfig, NodeError, ReplyPolicy};
use lamport_core::{PeerAddress, PeerId};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("lamport_cluster=debug")
        .with_test_writer()
        .try_init();
}

fn config(port: u16) -> NodeConfig {
    NodeConfig::new(PeerAddress::new("127.0.0.1", port)).with_probe_timeout(100)
}

async fn cluster(network: &LocalNetwork, ports: &[u16]) -> Vec<Arc<Node>> {
    let mut nodes = Vec::new();
    for port in ports {
        nodes.push(network.spawn(config(*port)).await);
    }
    for node in nodes.iter().skip(1) {
        node.join_network(nodes[0].address()).await.unwrap();
    }
    nodes
}

fn ids(records: &[lamport_cluster::PeerRecord]) -> Vec<PeerId> {
    records.iter().map(|r| r.peer_id).collect()
}

#[tokio::test]
async fn two_nodes_know_each_other_after_join() {
    init_tracing();
    let network = LocalNetwork::new();
    let n1 = network.spawn(config(2010)).await;
    let n2 = network.spawn(config(2011)).await;

    n2.join_network(n1.address()).await.unwrap();

    assert_eq!(ids(&n1.known_nodes().await), vec![n2.id()]);
    assert_eq!(ids(&n2.known_nodes().await), vec![n1.id()]);
}

#[tokio::test]
async fn lone_node_enters_without_waiting() {
    init_tracing();
    let network = LocalNetwork::new();
    let n1 = network.spawn(config(2010)).await;

    tokio::time::timeout(Duration::from_millis(100), n1.enter_cs())
        .await
        .unwrap()
        .unwrap();
    assert!(n1.is_in_critical_section().await);
}

#[tokio::test]
async fn second_requester_waits_for_release() {
    init_tracing();
    let network = LocalNetwork::new();
    let nodes = cluster(&network, &[2010, 2011]).await;
    let (n1, n2) = (Arc::clone(&nodes[0]), Arc::clone(&nodes[1]));

    n1.enter_cs().await.unwrap();
    let waiter = {
        let n2 = Arc::clone(&n2);
        tokio::spawn(async move { n2.enter_cs().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(n2.phase().await, CsPhase::Requesting);

    n1.leave_cs().await.unwrap();
    waiter.await.unwrap().unwrap();
    assert!(n2.is_in_critical_section().await);
}

#[tokio::test]
async fn killed_node_is_evicted_and_third_node_notified() {
    init_tracing();
    let network = LocalNetwork::new();
    let nodes = cluster(&network, &[2010, 2011, 2012]).await;
    let (n1, n2, n3) = (&nodes[0], &nodes[1], &nodes[2]);

    n1.kill();
    let dead = n2.detect_dead_nodes().await.unwrap();

    assert_eq!(dead, vec![n1.id()]);
    assert_eq!(ids(&n2.known_nodes().await), vec![n3.id()]);
    assert_eq!(ids(&n3.known_nodes().await), vec![n2.id()]);
}

#[tokio::test]
async fn write_under_lock_reaches_members() {
    init_tracing();
    let network = LocalNetwork::new();
    let nodes = cluster(&network, &[2010, 2011]).await;
    let (n1, n2) = (&nodes[0], &nodes[1]);

    n1.enter_cs().await.unwrap();
    n1.set_shared_variable(42).await.unwrap();
    n1.leave_cs().await.unwrap();

    assert_eq!(n2.get_shared_variable().await, 42);
}

#[tokio::test]
async fn write_outside_lock_is_rejected() {
    init_tracing();
    let network = LocalNetwork::new();
    let nodes = cluster(&network, &[2010, 2011]).await;
    let n1 = &nodes[0];

    assert_eq!(
        n1.set_shared_variable(7).await,
        Err(NodeError::NotInCriticalSection)
    );
    assert_eq!(n1.get_shared_variable().await, 0);
    assert_eq!(nodes[1].get_shared_variable().await, 0);
}

#[tokio::test]
async fn revived_node_rejoins_and_catches_up() {
    init_tracing();
    let network = LocalNetwork::new();
    let nodes = cluster(&network, &[2010, 2011, 2012]).await;
    let (n1, n2, n3) = (&nodes[0], &nodes[1], &nodes[2]);

    n3.kill();
    n1.detect_dead_nodes().await.unwrap();
    assert_eq!(n1.known_nodes().await.len(), 1);

    n1.enter_cs().await.unwrap();
    n1.set_shared_variable(5).await.unwrap();
    n1.leave_cs().await.unwrap();

    assert!(n3.revive().await);
    assert_eq!(n3.known_nodes().await.len(), 2);
    assert_eq!(n3.get_shared_variable().await, 5);
    for node in [n1, n2] {
        assert!(ids(&node.known_nodes().await).contains(&n3.id()));
    }

    n3.enter_cs().await.unwrap();
    n3.leave_cs().await.unwrap();
}

#[tokio::test]
async fn revive_cancels_pending_entry() {
    init_tracing();
    let network = LocalNetwork::new();
    let nodes = cluster(&network, &[2010, 2011]).await;
    let (n1, n2) = (Arc::clone(&nodes[0]), Arc::clone(&nodes[1]));

    n1.enter_cs().await.unwrap();
    let waiter = {
        let n2 = Arc::clone(&n2);
        tokio::spawn(async move { n2.enter_cs().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    n2.kill();
    n2.revive().await;
    assert_eq!(waiter.await.unwrap(), Err(NodeError::RequestAbandoned));
    assert_eq!(n2.phase().await, CsPhase::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn immediate_policy_serves_sequential_rounds() {
    init_tracing();
    let network = LocalNetwork::new();
    let mut nodes = Vec::new();
    for port in [2010, 2011, 2012] {
        nodes.push(
            network
                .spawn(config(port).with_reply_policy(ReplyPolicy::Immediate))
                .await,
        );
    }
    for node in nodes.iter().skip(1) {
        node.join_network(nodes[0].address()).await.unwrap();
    }

    for (round, node) in nodes.iter().enumerate() {
        node.enter_cs().await.unwrap();
        node.set_shared_variable(round as i64).await.unwrap();
        node.leave_cs().await.unwrap();
    }
    for node in &nodes {
        assert_eq!(node.get_shared_variable().await, 2);
        assert!(node.queue_status().await.is_empty());
    }
}

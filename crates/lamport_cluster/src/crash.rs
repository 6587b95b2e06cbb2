//! Crash simulation.
//!
//! A killed node keeps its process and listener but behaves like a crashed
//! peer: every inbound call stalls long enough for a probe to time out and
//! then fails.

use crate::node::{Node, NodeError, NodeResult};
use std::sync::atomic::Ordering;
use tracing::{debug, info, instrument, warn};

impl Node {
    /// Liveness flag
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Gate for inbound calls
    pub(crate) async fn ensure_alive(&self) -> NodeResult<()> {
        if self.is_alive() {
            return Ok(());
        }
        tokio::time::sleep(self.config.dead_delay()).await;
        Err(NodeError::Dead)
    }

    /// Stop answering peers
    #[instrument(skip(self), fields(node = %self.id))]
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        warn!(clock = %self.clock.now(), "node killed");
    }

    /// Come back with fresh protocol state and rejoin through a former peer
    ///
    /// Tries each previously known peer in turn and adopts the topology of
    /// the first that accepts. Returns false when none did, leaving the node
    /// alive but isolated.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn revive(&self) -> bool {
        self.alive.store(true, Ordering::SeqCst);

        let abandoned = self.section.lock().await.reset();
        self.queue.lock().await.clear();
        self.clock.reset();
        self.wake_waiters();
        if abandoned {
            debug!("pending critical section request dropped");
        }

        let previous = self.members.clear().await;
        info!(previous = previous.len(), "node revived, rejoining");

        for member in previous {
            match member.handle.join(self.id, self.address().clone()).await {
                Ok(topology) => {
                    info!(via = %member.peer_id, "rejoined network");
                    self.adopt_topology(topology).await;
                    return true;
                }
                Err(e) => {
                    debug!(via = %member.peer_id, error = %e, "rejoin attempt failed");
                }
            }
        }

        warn!("no former peer accepted the rejoin, node is isolated");
        false
    }
}

#[cfg(test)]
mod tests {
    use crate::config::NodeConfig;
    use crate::local::LocalNetwork;
    use crate::node::NodeError;
    use crate::remote::{PeerError, Transport};
    use lamport_core::{LogicalTime, PeerAddress, PeerId};
    use std::time::{Duration, Instant};

    fn config(port: u16) -> NodeConfig {
        NodeConfig::new(PeerAddress::new("127.0.0.1", port)).with_probe_timeout(50)
    }

    #[tokio::test]
    async fn test_dead_node_rejects_local_operations() {
        let network = LocalNetwork::new();
        let node = network.spawn(config(2010)).await;
        node.kill();

        assert!(!node.is_alive());
        assert_eq!(node.enter_cs().await, Err(NodeError::Dead));
        assert_eq!(node.set_shared_variable(1).await, Err(NodeError::Dead));
        assert_eq!(node.detect_dead_nodes().await, Err(NodeError::Dead));
    }

    #[tokio::test]
    async fn test_dead_node_stalls_inbound_calls() {
        let network = LocalNetwork::new();
        let node = network.spawn(config(2010)).await;
        node.kill();

        let handle = network.resolve(node.address());
        let started = Instant::now();
        assert_eq!(handle.ping().await, Err(PeerError::NodeDead));
        assert!(started.elapsed() >= Duration::from_millis(100));

        assert_eq!(
            handle
                .request_cs(PeerId::from_raw(1), LogicalTime::from_raw(1))
                .await,
            Err(PeerError::NodeDead)
        );
        assert!(node.queue_status().await.is_empty());
    }

    #[tokio::test]
    async fn test_revive_resets_protocol_state() {
        let network = LocalNetwork::new();
        let node = network.spawn(config(2010)).await;
        node.enter_cs().await.unwrap();
        node.kill();

        assert!(!node.revive().await);
        assert!(node.is_alive());
        assert!(!node.is_in_critical_section().await);
        assert!(node.queue_status().await.is_empty());
        assert_eq!(node.logical_clock(), LogicalTime::zero());
        node.enter_cs().await.unwrap();
    }
}

//! On-demand failure detection.
//!
//! A scan probes every member concurrently with a bounded wait. Peers that
//! fail the probe are evicted locally first, then the eviction is announced
//! to the survivors.

use crate::node::{Node, NodeError, NodeResult, Outbound};
use futures::future::join_all;
use lamport_core::PeerId;
use tracing::{debug, info, instrument, warn};

impl Node {
    /// Liveness probe
    ///
    /// # Errors
    ///
    /// `Dead` after the dead-node delay if the node is killed.
    pub async fn ping(&self) -> NodeResult<()> {
        self.ensure_alive().await
    }

    /// Probe every member and evict the ones that do not answer in time
    ///
    /// Returns the evicted peers in ascending id order.
    ///
    /// # Errors
    ///
    /// `Dead` if the node is killed.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn detect_dead_nodes(&self) -> NodeResult<Vec<PeerId>> {
        if !self.is_alive() {
            return Err(NodeError::Dead);
        }

        let members = self.members.members().await;
        let timeout = self.config.probe_timeout();
        info!(members = members.len(), timeout_ms = self.config.probe_timeout_ms, "probing members");

        let probes = members.iter().map(|member| async move {
            match tokio::time::timeout(timeout, member.handle.ping()).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    warn!(peer = %member.peer_id, error = %e, "probe failed");
                    Some(member.peer_id)
                }
                Err(_) => {
                    warn!(peer = %member.peer_id, "probe timed out");
                    Some(member.peer_id)
                }
            }
        });
        let dead: Vec<PeerId> = join_all(probes).await.into_iter().flatten().collect();

        if dead.is_empty() {
            debug!("all members answered");
            return Ok(dead);
        }

        for peer in &dead {
            self.forget(*peer).await;
            info!(peer = %peer, clock = %self.clock.now(), "evicted dead node");
        }
        for peer in &dead {
            self.broadcast(Outbound::NodeDead(*peer)).await;
        }
        Ok(dead)
    }

    /// Inbound eviction notice
    ///
    /// A killed node ignores the notice at once, without the dead-node
    /// stall.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn notify_node_dead(&self, peer: PeerId) -> NodeResult<()> {
        if !self.is_alive() {
            debug!(peer = %peer, "ignoring eviction notice while dead");
            return Ok(());
        }
        if self.forget(peer).await {
            info!(peer = %peer, "evicted dead node on notice");
        }
        Ok(())
    }
}

//! In-process transport.
//!
//! Nodes of one [`LocalNetwork`] call each other directly. The registry only
//! keeps weak references, so dropping the last `Arc<Node>` makes the peer
//! unreachable just like a stopped process.

use crate::config::NodeConfig;
use crate::membership::PeerRecord;
use crate::node::Node;
use crate::queue::Request;
use crate::remote::{PeerError, PeerHandle, PeerResult, Transport};
use async_trait::async_trait;
use lamport_core::{LogicalTime, PeerAddress, PeerId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

type Registry = Arc<RwLock<HashMap<PeerAddress, Weak<Node>>>>;

/// Registry of in-process nodes
#[derive(Clone, Default)]
pub struct LocalNetwork {
    nodes: Registry,
}

impl LocalNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a node on this network and register it under its address
    pub async fn spawn(&self, config: NodeConfig) -> Arc<Node> {
        let node = Arc::new(Node::new(config, Arc::new(self.clone())));
        self.nodes
            .write()
            .await
            .insert(node.address().clone(), Arc::downgrade(&node));
        node
    }

    /// Unregister the node at `address`
    pub async fn remove(&self, address: &PeerAddress) -> bool {
        self.nodes.write().await.remove(address).is_some()
    }

    /// Number of registered addresses
    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Check if empty
    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}

impl Transport for LocalNetwork {
    fn resolve(&self, address: &PeerAddress) -> Arc<dyn PeerHandle> {
        Arc::new(LocalPeer {
            address: address.clone(),
            nodes: Arc::clone(&self.nodes),
        })
    }
}

/// Handle to a node of a [`LocalNetwork`]
pub struct LocalPeer {
    address: PeerAddress,
    nodes: Registry,
}

impl LocalPeer {
    async fn node(&self) -> PeerResult<Arc<Node>> {
        self.nodes
            .read()
            .await
            .get(&self.address)
            .and_then(Weak::upgrade)
            .ok_or_else(|| PeerError::Unreachable {
                address: self.address.to_string(),
                reason: "no node registered".to_string(),
            })
    }
}

#[async_trait]
impl PeerHandle for LocalPeer {
    fn address(&self) -> &PeerAddress {
        &self.address
    }

    async fn get_node_id(&self) -> PeerResult<PeerId> {
        Ok(self.node().await?.id())
    }

    async fn ping(&self) -> PeerResult<()> {
        Ok(self.node().await?.ping().await?)
    }

    async fn join(&self, peer: PeerId, address: PeerAddress) -> PeerResult<Vec<PeerRecord>> {
        Ok(self.node().await?.join(peer, address).await?)
    }

    async fn add_node(&self, peer: PeerId, address: PeerAddress) -> PeerResult<()> {
        Ok(self.node().await?.add_node(peer, address).await?)
    }

    async fn remove_node(&self, peer: PeerId) -> PeerResult<()> {
        Ok(self.node().await?.remove_node(peer).await?)
    }

    async fn request_cs(&self, peer: PeerId, timestamp: LogicalTime) -> PeerResult<()> {
        Ok(self.node().await?.request_cs(peer, timestamp).await?)
    }

    async fn reply_cs(&self, peer: PeerId, timestamp: LogicalTime) -> PeerResult<()> {
        Ok(self.node().await?.reply_cs(peer, timestamp).await?)
    }

    async fn release_cs(&self, peer: PeerId, timestamp: LogicalTime) -> PeerResult<()> {
        Ok(self.node().await?.release_cs(peer, timestamp).await?)
    }

    async fn update_shared_variable(
        &self,
        value: i64,
        timestamp: LogicalTime,
        source: PeerId,
    ) -> PeerResult<()> {
        Ok(self
            .node()
            .await?
            .update_shared_variable(value, timestamp, source)
            .await?)
    }

    async fn sync_queue(&self, requests: Vec<Request>) -> PeerResult<()> {
        Ok(self.node().await?.sync_queue(requests).await?)
    }

    async fn notify_node_dead(&self, peer: PeerId) -> PeerResult<()> {
        Ok(self.node().await?.notify_node_dead(peer).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_registers_node() {
        let network = LocalNetwork::new();
        let node = network
            .spawn(NodeConfig::new(PeerAddress::new("127.0.0.1", 2010)))
            .await;
        assert_eq!(network.len().await, 1);

        let handle = network.resolve(node.address());
        assert_eq!(handle.get_node_id().await.unwrap(), node.id());
        handle.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_address_is_unreachable() {
        let network = LocalNetwork::new();
        let handle = network.resolve(&PeerAddress::new("127.0.0.1", 2999));
        assert!(matches!(
            handle.ping().await,
            Err(PeerError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_removed_node_is_unreachable() {
        let network = LocalNetwork::new();
        let node = network
            .spawn(NodeConfig::new(PeerAddress::new("127.0.0.1", 2010)))
            .await;
        assert!(network.remove(node.address()).await);
        assert!(network.is_empty().await);
        assert!(network.resolve(node.address()).get_node_id().await.is_err());
    }
}

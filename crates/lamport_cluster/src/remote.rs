//! Remote peer calls.
//!
//! [`PeerHandle`] is everything one node can invoke on another. How the call
//! travels is up to the [`Transport`] that produced the handle.

use crate::membership::PeerRecord;
use crate::queue::Request;
use async_trait::async_trait;
use lamport_core::{LogicalTime, PeerAddress, PeerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Errors raised while calling a peer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum PeerError {
    /// Connection failed or the peer is gone
    #[error("Peer {address} unreachable: {reason}")]
    Unreachable {
        /// Address that was called
        address: String,
        /// Transport-level reason
        reason: String,
    },

    /// Timeout
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// The peer is simulating a crash
    #[error("Node is dead")]
    NodeDead,

    /// Malformed or unexpected message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer refused the operation
    #[error("Rejected by peer: {0}")]
    Rejected(String),
}

/// Result of a peer call
pub type PeerResult<T> = Result<T, PeerError>;

/// A callable reference to one peer
///
/// These are the inbound operations of a node: the ones other nodes invoke
/// while running the mutex, membership and failure-detection protocols.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Address this handle talks to
    fn address(&self) -> &PeerAddress;

    /// Id of the node behind the handle
    async fn get_node_id(&self) -> PeerResult<PeerId>;

    /// Liveness probe
    async fn ping(&self) -> PeerResult<()>;

    /// Admit `peer` and return the topology as it was before the join
    async fn join(&self, peer: PeerId, address: PeerAddress) -> PeerResult<Vec<PeerRecord>>;

    /// Add `peer` to the membership table
    async fn add_node(&self, peer: PeerId, address: PeerAddress) -> PeerResult<()>;

    /// Remove `peer` from the membership table
    async fn remove_node(&self, peer: PeerId) -> PeerResult<()>;

    /// REQUEST message
    async fn request_cs(&self, peer: PeerId, timestamp: LogicalTime) -> PeerResult<()>;

    /// REPLY message
    async fn reply_cs(&self, peer: PeerId, timestamp: LogicalTime) -> PeerResult<()>;

    /// RELEASE message
    async fn release_cs(&self, peer: PeerId, timestamp: LogicalTime) -> PeerResult<()>;

    /// Replication push of the shared variable
    async fn update_shared_variable(
        &self,
        value: i64,
        timestamp: LogicalTime,
        source: PeerId,
    ) -> PeerResult<()>;

    /// Full request queue transfer to a joiner
    async fn sync_queue(&self, requests: Vec<Request>) -> PeerResult<()>;

    /// Eviction notice for `peer`
    async fn notify_node_dead(&self, peer: PeerId) -> PeerResult<()>;
}

/// Service registry: turns an address into a callable handle
///
/// Resolution never fails. A handle for an address nobody listens on fails
/// when it is called.
pub trait Transport: Send + Sync {
    /// Handle for the peer at `address`
    fn resolve(&self, address: &PeerAddress) -> Arc<dyn PeerHandle>;
}

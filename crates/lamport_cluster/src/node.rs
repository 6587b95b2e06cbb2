//! A single peer of the cluster.
//!
//! [`Node`] owns the Lamport clock, the membership table, the request queue,
//! the critical-section bookkeeping and the replicated variable. The
//! protocol operations live in sibling modules as further `impl Node`
//! blocks: `mutex`, `join`, `detector`, `crash` and `shared`.
//!
//! Lock discipline: no lock is held across an outbound call, and the queue
//! lock is never held while acquiring the section lock.

use crate::config::NodeConfig;
use crate::membership::{Member, Membership, PeerRecord};
use crate::mutex::{CriticalSection, CsPhase};
use crate::queue::{Request, RequestQueue};
use crate::remote::{PeerError, PeerHandle, PeerResult, Transport};
use crate::shared::ReplicaVariable;
use lamport_core::{LamportClock, LogicalTime, PeerAddress, PeerId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, warn};

/// Node errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// The node is simulating a crash
    #[error("Node is dead")]
    Dead,

    /// Operation requires holding the critical section
    #[error("Not in critical section")]
    NotInCriticalSection,

    /// Operation not allowed in the current phase
    #[error("Invalid phase: expected {expected}, found {actual}")]
    InvalidPhase {
        /// Required phase
        expected: CsPhase,
        /// Phase the node was in
        actual: CsPhase,
    },

    /// A pending entry was cancelled by revive or leave
    #[error("Critical section request abandoned")]
    RequestAbandoned,

    /// The bootstrap address points back at this node
    #[error("Cannot join through own address")]
    SelfJoin,

    /// A peer call failed
    #[error(transparent)]
    Peer(#[from] PeerError),
}

/// Result of a node operation
pub type NodeResult<T> = Result<T, NodeError>;

impl From<NodeError> for PeerError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Dead => PeerError::NodeDead,
            NodeError::Peer(inner) => inner,
            other => PeerError::Rejected(other.to_string()),
        }
    }
}

/// Snapshot of a node's observable state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Own id
    pub peer_id: PeerId,
    /// Own address
    pub address: PeerAddress,
    /// Liveness flag
    pub alive: bool,
    /// Current Lamport time
    pub clock: LogicalTime,
    /// Critical-section phase
    pub phase: CsPhase,
    /// Pending requests in priority order
    pub queue: Vec<Request>,
    /// Peers that replied to the current round
    pub replies: Vec<PeerId>,
    /// Membership table
    pub members: Vec<PeerRecord>,
    /// Local replica of the shared variable
    pub shared_value: i64,
    /// Injected message delay
    pub message_delay_ms: u64,
}

/// Outbound protocol message
#[derive(Debug, Clone)]
pub(crate) enum Outbound {
    Request(LogicalTime),
    Reply(LogicalTime),
    Release(LogicalTime),
    Update {
        value: i64,
        timestamp: LogicalTime,
        source: PeerId,
    },
    SyncQueue(Vec<Request>),
    AddNode(PeerRecord),
    RemoveNode(PeerId),
    NodeDead(PeerId),
}

impl Outbound {
    fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request_cs",
            Self::Reply(_) => "reply_cs",
            Self::Release(_) => "release_cs",
            Self::Update { .. } => "update_shared_variable",
            Self::SyncQueue(_) => "sync_queue",
            Self::AddNode(_) => "add_node",
            Self::RemoveNode(_) => "remove_node",
            Self::NodeDead(_) => "notify_node_dead",
        }
    }

    async fn deliver(&self, from: PeerId, handle: &dyn PeerHandle) -> PeerResult<()> {
        match self {
            Self::Request(ts) => handle.request_cs(from, *ts).await,
            Self::Reply(ts) => handle.reply_cs(from, *ts).await,
            Self::Release(ts) => handle.release_cs(from, *ts).await,
            Self::Update {
                value,
                timestamp,
                source,
            } => handle.update_shared_variable(*value, *timestamp, *source).await,
            Self::SyncQueue(requests) => handle.sync_queue(requests.clone()).await,
            Self::AddNode(record) => handle.add_node(record.peer_id, record.address.clone()).await,
            Self::RemoveNode(peer) => handle.remove_node(*peer).await,
            Self::NodeDead(peer) => handle.notify_node_dead(*peer).await,
        }
    }
}

/// One peer of the cluster
pub struct Node {
    pub(crate) id: PeerId,
    pub(crate) config: NodeConfig,
    pub(crate) clock: LamportClock,
    pub(crate) members: Membership,
    pub(crate) queue: Mutex<RequestQueue>,
    pub(crate) section: Mutex<CriticalSection>,
    pub(crate) admission: Notify,
    pub(crate) variable: RwLock<ReplicaVariable>,
    pub(crate) alive: AtomicBool,
    message_delay_ms: AtomicU64,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Node {
    /// Create an isolated, alive node
    #[must_use]
    pub fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Self {
        let id = config.peer_id();
        Self {
            id,
            clock: LamportClock::new(),
            members: Membership::new(id),
            queue: Mutex::new(RequestQueue::new()),
            section: Mutex::new(CriticalSection::default()),
            admission: Notify::new(),
            variable: RwLock::new(ReplicaVariable::default()),
            alive: AtomicBool::new(true),
            message_delay_ms: AtomicU64::new(config.message_delay_ms),
            transport,
            config,
        }
    }

    /// Own id
    #[must_use]
    pub const fn id(&self) -> PeerId {
        self.id
    }

    /// Advertised address
    #[must_use]
    pub fn address(&self) -> &PeerAddress {
        &self.config.address
    }

    /// Configuration the node was built with
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Current Lamport time
    #[must_use]
    pub fn logical_clock(&self) -> LogicalTime {
        self.clock.now()
    }

    /// Check if the node is inside the critical section
    pub async fn is_in_critical_section(&self) -> bool {
        self.section.lock().await.phase == CsPhase::InCs
    }

    /// Critical-section phase
    pub async fn phase(&self) -> CsPhase {
        self.section.lock().await.phase
    }

    /// Pending requests in priority order
    pub async fn queue_status(&self) -> Vec<Request> {
        self.queue.lock().await.snapshot()
    }

    /// Membership table
    pub async fn known_nodes(&self) -> Vec<PeerRecord> {
        self.members.records().await
    }

    /// Full observable state
    pub async fn status(&self) -> NodeStatus {
        let (phase, replies) = {
            let section = self.section.lock().await;
            let mut replies: Vec<PeerId> = section.replies.iter().copied().collect();
            replies.sort();
            (section.phase, replies)
        };
        NodeStatus {
            peer_id: self.id,
            address: self.config.address.clone(),
            alive: self.is_alive(),
            clock: self.clock.now(),
            phase,
            queue: self.queue_status().await,
            replies,
            members: self.known_nodes().await,
            shared_value: self.get_shared_variable().await,
            message_delay_ms: self.message_delay_ms(),
        }
    }

    /// Change the delay injected before every outbound message
    pub fn set_message_delay_ms(&self, delay_ms: u64) {
        self.message_delay_ms.store(delay_ms, Ordering::SeqCst);
        debug!(node = %self.id, delay_ms, "message delay changed");
    }

    /// Delay injected before every outbound message
    #[must_use]
    pub fn message_delay_ms(&self) -> u64 {
        self.message_delay_ms.load(Ordering::SeqCst)
    }

    pub(crate) fn record(&self) -> PeerRecord {
        PeerRecord::new(self.id, self.config.address.clone())
    }

    /// Wake every admission waiter so it re-evaluates
    pub(crate) fn wake_waiters(&self) {
        self.admission.notify_waiters();
    }

    async fn simulate_delay(&self) {
        let delay_ms = self.message_delay_ms();
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    /// Send one message to one member
    pub(crate) async fn send(&self, member: &Member, message: &Outbound) -> PeerResult<()> {
        self.simulate_delay().await;
        message.deliver(self.id, member.handle.as_ref()).await
    }

    /// Send to each of `members` in turn, logging and skipping failures
    pub(crate) async fn send_all(&self, members: &[Member], message: Outbound) {
        for member in members {
            if let Err(e) = self.send(member, &message).await {
                warn!(
                    node = %self.id,
                    peer = %member.peer_id,
                    message = message.kind(),
                    error = %e,
                    "failed to deliver message"
                );
            }
        }
    }

    /// Send to every current member
    pub(crate) async fn broadcast(&self, message: Outbound) {
        let members = self.members.members().await;
        self.send_all(&members, message).await;
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("address", &self.config.address)
            .field("alive", &self.is_alive())
            .field("clock", &self.clock.now())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalNetwork;

    #[tokio::test]
    async fn test_new_node_is_isolated() {
        let network = LocalNetwork::new();
        let node = network
            .spawn(NodeConfig::new(PeerAddress::new("127.0.0.1", 2010)))
            .await;

        let status = node.status().await;
        assert!(status.alive);
        assert_eq!(status.clock, LogicalTime::zero());
        assert_eq!(status.phase, CsPhase::Idle);
        assert!(status.queue.is_empty());
        assert!(status.members.is_empty());
        assert_eq!(status.shared_value, 0);
        assert_eq!(node.id(), PeerId::from_address(node.address()));
    }

    #[tokio::test]
    async fn test_message_delay_is_adjustable() {
        let network = LocalNetwork::new();
        let node = network
            .spawn(NodeConfig::new(PeerAddress::new("127.0.0.1", 2010)).with_message_delay(5))
            .await;
        assert_eq!(node.message_delay_ms(), 5);
        node.set_message_delay_ms(0);
        assert_eq!(node.status().await.message_delay_ms, 0);
    }

    #[test]
    fn test_node_error_to_peer_error() {
        assert_eq!(PeerError::from(NodeError::Dead), PeerError::NodeDead);
        assert_eq!(
            PeerError::from(NodeError::Peer(PeerError::Timeout(10))),
            PeerError::Timeout(10)
        );
        assert_eq!(
            PeerError::from(NodeError::SelfJoin),
            PeerError::Rejected("Cannot join through own address".to_string())
        );
    }

    #[test]
    fn test_status_serializes() {
        let status = NodeStatus {
            peer_id: PeerId::from_raw(3),
            address: PeerAddress::new("127.0.0.1", 2010),
            alive: true,
            clock: LogicalTime::from_raw(4),
            phase: CsPhase::Requesting,
            queue: vec![Request::new(PeerId::from_raw(3), LogicalTime::from_raw(4))],
            replies: vec![],
            members: vec![],
            shared_value: 7,
            message_delay_ms: 0,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "requesting");
        assert_eq!(json["queue"][0]["timestamp"], 4);
        assert_eq!(json["address"], "127.0.0.1:2010");
    }
}

//! TCP transport.
//!
//! Each peer call opens a connection, writes one JSON request line and reads
//! one JSON response line. [`RpcServer`] is the receiving side and dispatches
//! every request onto the local [`Node`].

use crate::membership::PeerRecord;
use crate::node::Node;
use crate::queue::Request;
use crate::remote::{PeerError, PeerHandle, PeerResult, Transport};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use lamport_core::{LogicalTime, PeerAddress, PeerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

/// Upper bound on one encoded message
const MAX_LINE_LENGTH: usize = 1 << 20;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Wire form of an inbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RpcRequest {
    /// Ask for the node id
    GetNodeId,
    /// Liveness probe
    Ping,
    /// Join through the callee
    Join {
        /// Joining peer
        peer: PeerId,
        /// Its address
        address: PeerAddress,
    },
    /// Membership add
    AddNode {
        /// New peer
        peer: PeerId,
        /// Its address
        address: PeerAddress,
    },
    /// Membership remove
    RemoveNode {
        /// Departing peer
        peer: PeerId,
    },
    /// REQUEST
    RequestCs {
        /// Sender
        peer: PeerId,
        /// Request timestamp
        timestamp: LogicalTime,
    },
    /// REPLY
    ReplyCs {
        /// Sender
        peer: PeerId,
        /// Sender clock
        timestamp: LogicalTime,
    },
    /// RELEASE
    ReleaseCs {
        /// Sender
        peer: PeerId,
        /// Sender clock
        timestamp: LogicalTime,
    },
    /// Shared variable push
    UpdateSharedVariable {
        /// New value
        value: i64,
        /// Write timestamp
        timestamp: LogicalTime,
        /// Writer
        source: PeerId,
    },
    /// Queue transfer
    SyncQueue {
        /// Requests in priority order
        requests: Vec<Request>,
    },
    /// Eviction notice
    NotifyNodeDead {
        /// Evicted peer
        peer: PeerId,
    },
}

/// Wire form of a call result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum RpcResponse {
    /// Call succeeded without a payload
    Ok,
    /// Answer to `GetNodeId`
    NodeId(PeerId),
    /// Answer to `Join`
    Topology(Vec<PeerRecord>),
    /// Call failed on the callee
    Failed(PeerError),
}

/// Run one request against the local node
pub async fn dispatch(node: &Node, request: RpcRequest) -> RpcResponse {
    let outcome = match request {
        RpcRequest::GetNodeId => Ok(RpcResponse::NodeId(node.id())),
        RpcRequest::Ping => node.ping().await.map(|()| RpcResponse::Ok),
        RpcRequest::Join { peer, address } => node.join(peer, address).await.map(RpcResponse::Topology),
        RpcRequest::AddNode { peer, address } => {
            node.add_node(peer, address).await.map(|()| RpcResponse::Ok)
        }
        RpcRequest::RemoveNode { peer } => node.remove_node(peer).await.map(|()| RpcResponse::Ok),
        RpcRequest::RequestCs { peer, timestamp } => {
            node.request_cs(peer, timestamp).await.map(|()| RpcResponse::Ok)
        }
        RpcRequest::ReplyCs { peer, timestamp } => {
            node.reply_cs(peer, timestamp).await.map(|()| RpcResponse::Ok)
        }
        RpcRequest::ReleaseCs { peer, timestamp } => {
            node.release_cs(peer, timestamp).await.map(|()| RpcResponse::Ok)
        }
        RpcRequest::UpdateSharedVariable {
            value,
            timestamp,
            source,
        } => node
            .update_shared_variable(value, timestamp, source)
            .await
            .map(|()| RpcResponse::Ok),
        RpcRequest::SyncQueue { requests } => node.sync_queue(requests).await.map(|()| RpcResponse::Ok),
        RpcRequest::NotifyNodeDead { peer } => {
            node.notify_node_dead(peer).await.map(|()| RpcResponse::Ok)
        }
    };
    outcome.unwrap_or_else(|e| RpcResponse::Failed(e.into()))
}

/// Accepts peer connections for one node
pub struct RpcServer {
    node: Arc<Node>,
}

impl RpcServer {
    /// Create a server for `node`
    #[must_use]
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    /// Accept connections until the listener fails
    ///
    /// # Errors
    ///
    /// Returns the accept error that stopped the loop.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        info!(node = %self.node.id(), local = ?listener.local_addr().ok(), "rpc server listening");
        loop {
            let (stream, remote) = listener.accept().await?;
            let node = Arc::clone(&self.node);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(&node, stream).await {
                    debug!(%remote, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn handle_connection(node: &Node, stream: TcpStream) -> PeerResult<()> {
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = lines.next().await {
        let line = line.map_err(|e| PeerError::Protocol(e.to_string()))?;
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => dispatch(node, request).await,
            Err(e) => {
                warn!(error = %e, "malformed request");
                RpcResponse::Failed(PeerError::Protocol(e.to_string()))
            }
        };
        let encoded =
            serde_json::to_string(&response).map_err(|e| PeerError::Protocol(e.to_string()))?;
        lines
            .send(encoded)
            .await
            .map_err(|e| PeerError::Protocol(e.to_string()))?;
    }
    Ok(())
}

/// Resolves addresses to [`TcpPeer`] handles
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout_ms: u64,
}

impl TcpTransport {
    /// Create a transport with the default connect timeout
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    /// Set connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn resolve(&self, address: &PeerAddress) -> Arc<dyn PeerHandle> {
        Arc::new(TcpPeer {
            address: address.clone(),
            connect_timeout_ms: self.connect_timeout_ms,
        })
    }
}

/// Client side of one remote peer
#[derive(Debug, Clone)]
pub struct TcpPeer {
    address: PeerAddress,
    connect_timeout_ms: u64,
}

impl TcpPeer {
    fn unreachable(&self, reason: impl ToString) -> PeerError {
        PeerError::Unreachable {
            address: self.address.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn call(&self, request: RpcRequest) -> PeerResult<RpcResponse> {
        let target = self.address.to_string();
        let stream = tokio::time::timeout(
            Duration::from_millis(self.connect_timeout_ms),
            TcpStream::connect(target.as_str()),
        )
        .await
        .map_err(|_| PeerError::Timeout(self.connect_timeout_ms))?
        .map_err(|e| self.unreachable(e))?;

        let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let encoded =
            serde_json::to_string(&request).map_err(|e| PeerError::Protocol(e.to_string()))?;
        lines.send(encoded).await.map_err(|e| self.unreachable(e))?;

        let line = lines
            .next()
            .await
            .ok_or_else(|| self.unreachable("connection closed before response"))?
            .map_err(|e| self.unreachable(e))?;
        match serde_json::from_str(&line).map_err(|e| PeerError::Protocol(e.to_string()))? {
            RpcResponse::Failed(e) => Err(e),
            response => Ok(response),
        }
    }

    async fn call_ok(&self, request: RpcRequest) -> PeerResult<()> {
        match self.call(request).await? {
            RpcResponse::Ok => Ok(()),
            other => Err(PeerError::Protocol(format!("unexpected response: {:?}", other))),
        }
    }
}

#[async_trait]
impl PeerHandle for TcpPeer {
    fn address(&self) -> &PeerAddress {
        &self.address
    }

    async fn get_node_id(&self) -> PeerResult<PeerId> {
        match self.call(RpcRequest::GetNodeId).await? {
            RpcResponse::NodeId(id) => Ok(id),
            other => Err(PeerError::Protocol(format!("unexpected response: {:?}", other))),
        }
    }

    async fn ping(&self) -> PeerResult<()> {
        self.call_ok(RpcRequest::Ping).await
    }

    async fn join(&self, peer: PeerId, address: PeerAddress) -> PeerResult<Vec<PeerRecord>> {
        match self.call(RpcRequest::Join { peer, address }).await? {
            RpcResponse::Topology(records) => Ok(records),
            other => Err(PeerError::Protocol(format!("unexpected response: {:?}", other))),
        }
    }

    async fn add_node(&self, peer: PeerId, address: PeerAddress) -> PeerResult<()> {
        self.call_ok(RpcRequest::AddNode { peer, address }).await
    }

    async fn remove_node(&self, peer: PeerId) -> PeerResult<()> {
        self.call_ok(RpcRequest::RemoveNode { peer }).await
    }

    async fn request_cs(&self, peer: PeerId, timestamp: LogicalTime) -> PeerResult<()> {
        self.call_ok(RpcRequest::RequestCs { peer, timestamp }).await
    }

    async fn reply_cs(&self, peer: PeerId, timestamp: LogicalTime) -> PeerResult<()> {
        self.call_ok(RpcRequest::ReplyCs { peer, timestamp }).await
    }

    async fn release_cs(&self, peer: PeerId, timestamp: LogicalTime) -> PeerResult<()> {
        self.call_ok(RpcRequest::ReleaseCs { peer, timestamp }).await
    }

    async fn update_shared_variable(
        &self,
        value: i64,
        timestamp: LogicalTime,
        source: PeerId,
    ) -> PeerResult<()> {
        self.call_ok(RpcRequest::UpdateSharedVariable {
            value,
            timestamp,
            source,
        })
        .await
    }

    async fn sync_queue(&self, requests: Vec<Request>) -> PeerResult<()> {
        self.call_ok(RpcRequest::SyncQueue { requests }).await
    }

    async fn notify_node_dead(&self, peer: PeerId) -> PeerResult<()> {
        self.call_ok(RpcRequest::NotifyNodeDead { peer }).await
    }
}

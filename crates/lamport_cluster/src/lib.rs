//! Lamport cluster
//!
//! Distributed mutual exclusion over a dynamic, fully connected set of
//! peers. Lamport clocks order requests, membership changes at runtime,
//! crashed peers are found by an on-demand failure detector, and a single
//! integer is replicated under the lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crash;
pub mod detector;
pub mod join;
pub mod local;
pub mod membership;
pub mod mutex;
pub mod node;
pub mod queue;
pub mod remote;
pub mod shared;
pub mod transport;

pub use config::{NodeConfig, ReplyPolicy, DEFAULT_PROBE_TIMEOUT_MS};
pub use local::{LocalNetwork, LocalPeer};
pub use membership::{Member, Membership, PeerRecord};
pub use mutex::CsPhase;
pub use node::{Node, NodeError, NodeResult, NodeStatus};
pub use queue::{Request, RequestQueue};
pub use remote::{PeerError, PeerHandle, PeerResult, Transport};
pub use shared::{ReplicaVariable, WriteStamp};
pub use transport::{RpcRequest, RpcResponse, RpcServer, TcpPeer, TcpTransport};

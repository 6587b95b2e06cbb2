//! Cluster membership management.

use crate::remote::PeerHandle;
use lamport_core::{PeerAddress, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Serializable `(id, address)` pair, the unit of a topology transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Peer id
    pub peer_id: PeerId,
    /// Advertised address
    pub address: PeerAddress,
}

impl PeerRecord {
    /// Create a new record
    #[must_use]
    pub fn new(peer_id: PeerId, address: PeerAddress) -> Self {
        Self { peer_id, address }
    }
}

/// Cluster member information
#[derive(Clone)]
pub struct Member {
    /// Member peer id
    pub peer_id: PeerId,
    /// Member address
    pub address: PeerAddress,
    /// Callable handle
    pub handle: Arc<dyn PeerHandle>,
}

impl Member {
    /// Create a new member, taking its address from the handle
    #[must_use]
    pub fn new(peer_id: PeerId, handle: Arc<dyn PeerHandle>) -> Self {
        Self {
            peer_id,
            address: handle.address().clone(),
            handle,
        }
    }

    /// Record form, without the handle
    #[must_use]
    pub fn record(&self) -> PeerRecord {
        PeerRecord::new(self.peer_id, self.address.clone())
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("peer_id", &self.peer_id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Membership table of one node
///
/// Holds every other peer the node currently believes is in the cluster.
/// The owner never appears in its own table.
pub struct Membership {
    /// Known members
    members: Arc<RwLock<HashMap<PeerId, Member>>>,
    /// Owning node
    owner: PeerId,
}

impl Membership {
    /// Create an empty table for `owner`
    #[must_use]
    pub fn new(owner: PeerId) -> Self {
        Self {
            members: Arc::new(RwLock::new(HashMap::new())),
            owner,
        }
    }

    /// Owning node
    #[must_use]
    pub const fn owner(&self) -> PeerId {
        self.owner
    }

    /// Add or refresh a member
    ///
    /// Returns false when nothing was inserted because the member is the
    /// owner itself.
    pub async fn insert(&self, member: Member) -> bool {
        if member.peer_id == self.owner {
            return false;
        }
        self.members.write().await.insert(member.peer_id, member);
        true
    }

    /// Remove a member
    pub async fn remove(&self, peer: PeerId) -> Option<Member> {
        self.members.write().await.remove(&peer)
    }

    /// Get a member by id
    pub async fn get(&self, peer: PeerId) -> Option<Member> {
        self.members.read().await.get(&peer).cloned()
    }

    /// Check membership
    pub async fn contains(&self, peer: PeerId) -> bool {
        self.members.read().await.contains_key(&peer)
    }

    /// All members, ordered by peer id
    pub async fn members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.read().await.values().cloned().collect();
        members.sort_by_key(|m| m.peer_id);
        members
    }

    /// All member ids, ascending
    pub async fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.members.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// All members as records, ordered by peer id
    pub async fn records(&self) -> Vec<PeerRecord> {
        self.members().await.iter().map(Member::record).collect()
    }

    /// Get member count
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Check if empty
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Drop every member and hand them back
    pub async fn clear(&self) -> Vec<Member> {
        let mut drained: Vec<Member> = self.members.write().await.drain().map(|(_, m)| m).collect();
        drained.sort_by_key(|m| m.peer_id);
        drained
    }
}

//! Dynamic membership: join, leave and state transfer.

use crate::membership::{Member, PeerRecord};
use crate::mutex::CsPhase;
use crate::node::{Node, NodeError, NodeResult, Outbound};
use crate::queue::Request;
use lamport_core::{PeerAddress, PeerId};
use tracing::{debug, info, instrument, warn};

impl Node {
    /// Join the cluster reachable at `bootstrap`
    ///
    /// Adopts the returned topology, then sends an initial reply to every
    /// requester already in the transferred queue so their pending rounds
    /// do not wait on us forever. Returns the size of the membership table.
    ///
    /// # Errors
    ///
    /// `SelfJoin` when `bootstrap` is this node, `Peer` when the bootstrap
    /// cannot be reached or refuses.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn join_network(&self, bootstrap: &PeerAddress) -> NodeResult<usize> {
        if !self.is_alive() {
            return Err(NodeError::Dead);
        }

        let handle = self.transport.resolve(bootstrap);
        let bootstrap_id = handle.get_node_id().await?;
        if bootstrap_id == self.id {
            return Err(NodeError::SelfJoin);
        }

        info!(via = %bootstrap, "joining network");
        let topology = handle.join(self.id, self.address().clone()).await?;
        self.adopt_topology(topology).await;
        Ok(self.members.len().await)
    }

    /// Add every record of a topology transfer, then replay replies
    pub(crate) async fn adopt_topology(&self, topology: Vec<PeerRecord>) {
        for record in topology {
            self.admit(record.peer_id, record.address).await;
        }

        let pending: Vec<Request> = self
            .queue
            .lock()
            .await
            .snapshot()
            .into_iter()
            .filter(|r| r.peer_id != self.id)
            .collect();
        for request in pending {
            debug!(peer = %request.peer_id, "sending initial reply");
            self.reply_to(request.peer_id).await;
        }

        let members = self.members.len().await;
        info!(clock = %self.clock.now(), members, "joined network");
    }

    /// Inbound join from `peer`
    ///
    /// Returns the topology before the join, including this node. The
    /// joiner receives the shared variable and the request queue, and every
    /// other member learns about it.
    ///
    /// # Errors
    ///
    /// `Dead` after the dead-node delay if the node is killed, `SelfJoin`
    /// when `peer` is this node.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn join(&self, peer: PeerId, address: PeerAddress) -> NodeResult<Vec<PeerRecord>> {
        self.ensure_alive().await?;
        if peer == self.id {
            return Err(NodeError::SelfJoin);
        }

        let others: Vec<Member> = self
            .members
            .members()
            .await
            .into_iter()
            .filter(|m| m.peer_id != peer)
            .collect();
        let mut topology: Vec<PeerRecord> = others.iter().map(Member::record).collect();
        topology.push(self.record());

        // a rejoining peer comes back with fresh state, anything queued for it is stale
        self.purge(peer).await;
        let Some(joiner) = self.admit(peer, address).await else {
            return Ok(topology);
        };

        let transfer = self.variable_transfer().await;
        if let Err(e) = self.send(&joiner, &transfer).await {
            warn!(peer = %peer, error = %e, "failed to transfer shared variable");
        }
        let requests = self.queue.lock().await.snapshot();
        if let Err(e) = self.send(&joiner, &Outbound::SyncQueue(requests)).await {
            warn!(peer = %peer, error = %e, "failed to transfer request queue");
        }

        self.send_all(&others, Outbound::AddNode(joiner.record())).await;
        Ok(topology)
    }

    /// Inbound notice that `peer` joined
    ///
    /// # Errors
    ///
    /// `Dead` after the dead-node delay if the node is killed.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn add_node(&self, peer: PeerId, address: PeerAddress) -> NodeResult<()> {
        self.ensure_alive().await?;
        self.purge(peer).await;
        self.admit(peer, address).await;
        Ok(())
    }

    /// Inbound notice that `peer` left
    ///
    /// # Errors
    ///
    /// `Dead` after the dead-node delay if the node is killed.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn remove_node(&self, peer: PeerId) -> NodeResult<()> {
        self.ensure_alive().await?;
        if self.forget(peer).await {
            info!(peer = %peer, "node left");
        }
        Ok(())
    }

    /// Inbound queue transfer
    ///
    /// Replaces the local queue, keeping our own pending request.
    ///
    /// # Errors
    ///
    /// `Dead` after the dead-node delay if the node is killed.
    #[instrument(skip(self, requests), fields(node = %self.id, size = requests.len()))]
    pub async fn sync_queue(&self, requests: Vec<Request>) -> NodeResult<()> {
        self.ensure_alive().await?;
        let own = self.section.lock().await.request;
        let id = self.id;

        let mut queue = self.queue.lock().await;
        queue.replace(requests.into_iter().filter(|r| r.peer_id != id).chain(own));
        debug!(size = queue.len(), "request queue synchronized");
        drop(queue);

        self.wake_waiters();
        Ok(())
    }

    /// Leave the cluster
    ///
    /// Tells every member to drop us, then clears all protocol state. A
    /// pending request is abandoned. A held critical section stays held.
    ///
    /// # Errors
    ///
    /// `Dead` if the node is killed.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn leave(&self) -> NodeResult<()> {
        if self.members.is_empty().await {
            debug!("not part of a network");
            return Ok(());
        }
        if !self.is_alive() {
            return Err(NodeError::Dead);
        }

        info!("leaving network");
        let members = self.members.members().await;
        self.send_all(&members, Outbound::RemoveNode(self.id)).await;

        self.members.clear().await;
        self.queue.lock().await.clear();
        {
            let mut section = self.section.lock().await;
            section.replies.clear();
            section.deferred.clear();
            if section.phase != CsPhase::InCs {
                section.reset();
            }
        }
        self.wake_waiters();
        Ok(())
    }

    /// Add `peer` to the membership table, returns the new member
    pub(crate) async fn admit(&self, peer: PeerId, address: PeerAddress) -> Option<Member> {
        if peer == self.id {
            return None;
        }
        self.clock.tick();
        let member = Member::new(peer, self.transport.resolve(&address));
        self.members.insert(member.clone()).await;
        let members = self.members.len().await;
        info!(node = %self.id, peer = %peer, address = %address, members, "added node");
        Some(member)
    }

    /// Drop every trace of `peer`, returns true if it was a member
    pub(crate) async fn forget(&self, peer: PeerId) -> bool {
        let removed = self.members.remove(peer).await.is_some();
        self.purge(peer).await;
        debug!(node = %self.id, peer = %peer, removed, "forgot peer");
        removed
    }

    /// Drop queued requests, replies and deferred replies of `peer`
    async fn purge(&self, peer: PeerId) {
        let purged = self.queue.lock().await.remove_peer(peer);
        {
            let mut section = self.section.lock().await;
            section.replies.remove(&peer);
            section.deferred.remove(&peer);
        }
        if purged > 0 {
            debug!(node = %self.id, peer = %peer, purged, "purged queued requests");
        }
        self.wake_waiters();
    }
}

//! Lamport mutual exclusion.
//!
//! A node asks for the critical section by queueing a timestamped request
//! and broadcasting it. It enters once its request heads the queue and
//! every current member has replied. Leaving broadcasts a release, which
//! purges the request from every queue.
//!
//! With [`ReplyPolicy::Deferred`] a node whose own pending request has
//! priority holds back its reply until it releases. Without FIFO links this
//! is what stops an older request from arriving after a younger one has
//! already collected all replies.

use crate::config::ReplyPolicy;
use crate::node::{Node, NodeError, NodeResult, Outbound};
use crate::queue::Request;
use lamport_core::{LogicalTime, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Critical-section phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsPhase {
    /// Not interested
    #[default]
    Idle,
    /// Waiting for admission
    Requesting,
    /// Holding the critical section
    InCs,
}

impl fmt::Display for CsPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Requesting => write!(f, "requesting"),
            Self::InCs => write!(f, "in_cs"),
        }
    }
}

/// Per-round bookkeeping, guarded by one lock
#[derive(Debug, Default)]
pub(crate) struct CriticalSection {
    pub(crate) phase: CsPhase,
    /// Own request of the current round
    pub(crate) request: Option<Request>,
    /// Peers that replied during the current round
    pub(crate) replies: HashSet<PeerId>,
    /// Requesters whose reply is held back until release
    pub(crate) deferred: BTreeSet<PeerId>,
    /// Bumped on every new round and every reset
    pub(crate) round: u64,
}

impl CriticalSection {
    /// Drop the current round, returns true if a request was pending
    pub(crate) fn reset(&mut self) -> bool {
        let abandoned = self.phase == CsPhase::Requesting;
        self.phase = CsPhase::Idle;
        self.request = None;
        self.replies.clear();
        self.deferred.clear();
        self.round += 1;
        abandoned
    }
}

enum Admission {
    Granted,
    Waiting,
    Abandoned,
}

impl Node {
    /// Request the critical section and wait until it is granted
    ///
    /// # Errors
    ///
    /// `Dead` if the node is killed, `InvalidPhase` if a round is already
    /// running, `RequestAbandoned` if a revive or leave cancels the wait.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn enter_cs(&self) -> NodeResult<()> {
        if !self.is_alive() {
            return Err(NodeError::Dead);
        }

        let (request, round) = {
            let mut section = self.section.lock().await;
            if section.phase != CsPhase::Idle {
                return Err(NodeError::InvalidPhase {
                    expected: CsPhase::Idle,
                    actual: section.phase,
                });
            }
            let request = Request::new(self.id, self.clock.tick());
            section.phase = CsPhase::Requesting;
            section.request = Some(request);
            section.replies.clear();
            section.round += 1;
            (request, section.round)
        };
        self.queue.lock().await.insert(request);

        info!(clock = %self.clock.now(), timestamp = %request.timestamp, "requesting critical section");
        self.broadcast(Outbound::Request(request.timestamp)).await;

        self.await_admission(round).await?;
        info!(clock = %self.clock.now(), "entered critical section");
        Ok(())
    }

    async fn await_admission(&self, round: u64) -> NodeResult<()> {
        loop {
            let notified = self.admission.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_admit(round).await {
                Admission::Granted => return Ok(()),
                Admission::Abandoned => {
                    warn!(node = %self.id, "critical section request abandoned");
                    return Err(NodeError::RequestAbandoned);
                }
                Admission::Waiting => notified.await,
            }
        }
    }

    async fn try_admit(&self, round: u64) -> Admission {
        let members = self.members.ids().await;
        let head = self.queue.lock().await.head();

        let mut section = self.section.lock().await;
        if section.round != round || section.phase != CsPhase::Requesting {
            return Admission::Abandoned;
        }
        if !self.is_alive() {
            return Admission::Waiting;
        }

        let at_head = head.is_some_and(|h| h.peer_id == self.id);
        let all_replied = members.iter().all(|peer| section.replies.contains(peer));
        if at_head && all_replied {
            section.phase = CsPhase::InCs;
            Admission::Granted
        } else {
            debug!(
                node = %self.id,
                at_head,
                replies = section.replies.len(),
                members = members.len(),
                "waiting for admission"
            );
            Admission::Waiting
        }
    }

    /// Leave the critical section
    ///
    /// Broadcasts the release first, then sends every reply that was held
    /// back during the round.
    ///
    /// # Errors
    ///
    /// `NotInCriticalSection` unless the node holds the critical section.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn leave_cs(&self) -> NodeResult<()> {
        if self.section.lock().await.phase != CsPhase::InCs {
            return Err(NodeError::NotInCriticalSection);
        }

        let timestamp = self.clock.tick();
        self.queue.lock().await.remove_peer(self.id);
        info!(clock = %timestamp, "leaving critical section");
        self.broadcast(Outbound::Release(timestamp)).await;

        let deferred = {
            let mut section = self.section.lock().await;
            section.phase = CsPhase::Idle;
            section.request = None;
            section.replies.clear();
            std::mem::take(&mut section.deferred)
        };
        for peer in deferred {
            debug!(peer = %peer, "sending deferred reply");
            self.reply_to(peer).await;
        }
        Ok(())
    }

    /// Inbound REQUEST from `from`
    ///
    /// # Errors
    ///
    /// `Dead` after the dead-node delay if the node is killed.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn request_cs(&self, from: PeerId, timestamp: LogicalTime) -> NodeResult<()> {
        self.ensure_alive().await?;
        self.clock.observe(timestamp);

        let request = Request::new(from, timestamp);
        self.queue.lock().await.insert(request);

        let defer = {
            let mut section = self.section.lock().await;
            let defer = self.config.reply_policy == ReplyPolicy::Deferred
                && section.phase != CsPhase::Idle
                && section.request.is_some_and(|own| own < request);
            if defer {
                section.deferred.insert(from);
            }
            defer
        };

        if defer {
            debug!(clock = %self.clock.now(), peer = %from, "own request has priority, deferring reply");
        } else {
            debug!(clock = %self.clock.now(), peer = %from, "queued request");
            self.reply_to(from).await;
        }
        Ok(())
    }

    /// Inbound REPLY from `from`
    ///
    /// # Errors
    ///
    /// `Dead` after the dead-node delay if the node is killed.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn reply_cs(&self, from: PeerId, timestamp: LogicalTime) -> NodeResult<()> {
        self.ensure_alive().await?;
        self.clock.observe(timestamp);
        self.section.lock().await.replies.insert(from);
        debug!(clock = %self.clock.now(), peer = %from, "received reply");
        self.wake_waiters();
        Ok(())
    }

    /// Inbound RELEASE from `from`
    ///
    /// # Errors
    ///
    /// `Dead` after the dead-node delay if the node is killed.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn release_cs(&self, from: PeerId, timestamp: LogicalTime) -> NodeResult<()> {
        self.ensure_alive().await?;
        self.clock.observe(timestamp);
        let removed = self.queue.lock().await.remove_peer(from);
        debug!(clock = %self.clock.now(), peer = %from, removed, "received release");
        self.wake_waiters();
        Ok(())
    }

    /// Send a REPLY to `peer` if it is a known member
    pub(crate) async fn reply_to(&self, peer: PeerId) {
        let Some(member) = self.members.get(peer).await else {
            debug!(node = %self.id, peer = %peer, "not replying to unknown peer");
            return;
        };
        let timestamp = self.clock.tick();
        if let Err(e) = self.send(&member, &Outbound::Reply(timestamp)).await {
            warn!(node = %self.id, peer = %peer, error = %e, "failed to send reply");
        }
    }
}

//! Priority queue of pending critical-section requests.

use lamport_core::{LogicalTime, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One outstanding desire to enter the critical section
///
/// Field order matters: the derived `Ord` sorts by timestamp first and
/// breaks ties by ascending peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Request {
    /// Lamport time of the request
    pub timestamp: LogicalTime,
    /// Requesting peer
    pub peer_id: PeerId,
}

impl Request {
    /// Create a new request
    #[must_use]
    pub const fn new(peer_id: PeerId, timestamp: LogicalTime) -> Self {
        Self { timestamp, peer_id }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Req(node={}, ts={})", self.peer_id, self.timestamp)
    }
}

/// Requests ordered by `(timestamp, peer_id)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestQueue {
    entries: BTreeSet<Request>,
}

impl RequestQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request, returns false if it was already queued
    pub fn insert(&mut self, request: Request) -> bool {
        self.entries.insert(request)
    }

    /// Highest-priority request
    #[must_use]
    pub fn head(&self) -> Option<Request> {
        self.entries.first().copied()
    }

    /// Drop every request of `peer`, returns how many were removed
    pub fn remove_peer(&mut self, peer: PeerId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|r| r.peer_id != peer);
        before - self.entries.len()
    }

    /// Replace the whole content
    pub fn replace(&mut self, requests: impl IntoIterator<Item = Request>) {
        self.entries = requests.into_iter().collect();
    }

    /// Requests in priority order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Request> {
        self.entries.iter().copied().collect()
    }

    /// Number of queued requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Display for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, request) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", request)?;
        }
        write!(f, "]")
    }
}

//! Lamport Mutex Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Peer identity, peer addresses and Lamport logical time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::{PeerAddress, PeerId};
pub use time::{LamportClock, LogicalTime};

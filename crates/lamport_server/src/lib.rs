//! Lamport node server
//!
//! Wires a cluster node to its RPC listener, an HTTP control surface and an
//! interactive console.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod console;
pub mod logging;

pub use api::{router, ApiError};
pub use console::Command;

//! Infrastructure layer for osc-relay.
//!
//! The infrastructure layer handles all I/O.
//!
//! # Responsibilities
//!
//! - Binding the UDP socket and tracking the last UDP sender
//! - Binding the WebSocket listener and performing the upgrade handshake
//! - Running one Tokio task per receive path (UDP socket, each WebSocket
//!   connection) so neither transport can block the other
//! - Releasing every socket when a transport is closed
//!
//! # What does NOT belong here?
//!
//! - OSC decoding or re-encoding (that is `osc-relay-core`, driven by the
//!   application layer)
//! - Deciding where a packet goes (that is the controller)

pub mod error;
pub mod udp_transport;
pub mod ws_transport;

pub use error::TransportError;
pub use udp_transport::{UdpDatagram, UdpOptions, UdpTransport};
pub use ws_transport::{WsFrame, WsOptions, WsTransport};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a std mutex, recovering the data if a holder panicked.
///
/// The guarded values (peer sightings, connection sets, task handles) stay
/// consistent on every write, so a poisoned lock is safe to reuse.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

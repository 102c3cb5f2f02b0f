//! Transport error type.

use std::net::SocketAddr;

use thiserror::Error;

use crate::domain::ConnectionId;

/// Errors produced by the UDP and WebSocket transports.
///
/// Only [`TransportError::Bind`] ever reaches the lifecycle caller (as a
/// failed `start`).  Every other variant is logged where it happens and the
/// transport keeps running.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be bound (port in use, permission denied, ...).
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,

    /// No WebSocket connection with this handle is active.
    #[error("unknown WebSocket connection {0}")]
    UnknownConnection(ConnectionId),

    /// The client's outbound queue is full; the frame was not queued.
    #[error("outbound queue for WebSocket connection {0} is full")]
    QueueFull(ConnectionId),

    /// A datagram could not be sent.
    #[error("failed to send to {dest}: {source}")]
    Send {
        dest: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

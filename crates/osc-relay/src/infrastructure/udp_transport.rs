//! UDP transport: one socket, any number of senders.
//!
//! The transport binds `0.0.0.0:<port>` and runs a receive task that emits
//! every datagram, together with its sender, on an mpsc channel.  Before a
//! datagram is emitted its sender is recorded as the *last known peer*; the
//! controller uses that address as the destination for packets coming from
//! WebSocket clients, which covers the common setup of one OSC device talking
//! to one or more browsers.
//!
//! # Why no connect()?
//!
//! OSC devices send from whatever port they like and several may share the
//! relay, so the socket stays unconnected and every send names its target.
//!
//! # Closing
//!
//! `close()` aborts the receive task, waits for it to finish and drops the
//! socket, so the port can be bound again as soon as `close()` returns.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::BridgeConfig;
use crate::infrastructure::{lock, TransportError};

/// One received datagram and its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    pub bytes: Vec<u8>,
    pub source: SocketAddr,
}

/// Settings for one UDP transport.
#[derive(Debug, Clone)]
pub struct UdpOptions {
    pub max_datagram_size: usize,
    pub inbound_capacity: usize,
    pub peer_idle_timeout: Option<Duration>,
}

impl From<&BridgeConfig> for UdpOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            max_datagram_size: config.max_datagram_size,
            inbound_capacity: config.inbound_capacity,
            peer_idle_timeout: config.peer_idle_timeout,
        }
    }
}

impl Default for UdpOptions {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
struct PeerSighting {
    addr: SocketAddr,
    seen_at: Instant,
}

/// An open (or closed) UDP transport.
///
/// The socket and task slots are `None` once the transport has been closed.
pub struct UdpTransport {
    local_addr: SocketAddr,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    last_peer: Arc<Mutex<Option<PeerSighting>>>,
    peer_idle_timeout: Option<Duration>,
}

impl UdpTransport {
    /// Binds `0.0.0.0:port` and starts receiving.
    ///
    /// Returns the transport and the receiver on which datagrams arrive in
    /// receipt order.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the socket cannot be bound.
    pub async fn open(
        port: u16,
        options: &UdpOptions,
    ) -> Result<(Self, mpsc::Receiver<UdpDatagram>), TransportError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        let socket = Arc::new(socket);
        let last_peer = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::channel(options.inbound_capacity.max(1));

        let recv_task = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            options.max_datagram_size,
            Arc::clone(&last_peer),
            tx,
        ));

        info!("UDP transport listening on {local_addr}");

        Ok((
            Self {
                local_addr,
                socket: Mutex::new(Some(socket)),
                recv_task: Mutex::new(Some(recv_task)),
                last_peer,
                peer_idle_timeout: options.peer_idle_timeout,
            },
            rx,
        ))
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.socket).is_none()
    }

    /// The most recent sender, unless it has been silent for longer than the
    /// idle timeout.
    pub fn last_peer(&self) -> Option<SocketAddr> {
        let sighting = (*lock(&self.last_peer))?;
        match self.peer_idle_timeout {
            Some(idle) if sighting.seen_at.elapsed() > idle => None,
            _ => Some(sighting.addr),
        }
    }

    /// Sends one datagram to `dest`.
    ///
    /// UDP gives no delivery guarantee, so success only means the OS accepted
    /// the datagram.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Closed`] if the transport has been closed.
    /// - [`TransportError::Send`] if the OS rejected the send.
    pub async fn send(&self, bytes: &[u8], dest: SocketAddr) -> Result<usize, TransportError> {
        // Clone the Arc so the lock is not held across the await.
        let socket = lock(&self.socket).clone().ok_or(TransportError::Closed)?;
        socket
            .send_to(bytes, dest)
            .await
            .map_err(|source| TransportError::Send { dest, source })
    }

    /// Stops receiving and releases the socket.
    ///
    /// Calling `close` on a closed transport does nothing.
    pub async fn close(&self) {
        let task = lock(&self.recv_task).take();
        let socket = lock(&self.socket).take();
        if task.is_none() && socket.is_none() {
            return;
        }

        if let Some(task) = task {
            task.abort();
            // The aborted task drops its socket handle before the join resolves.
            let _ = task.await;
        }
        drop(socket);
        *lock(&self.last_peer) = None;

        info!("UDP transport on {} closed", self.local_addr);
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        if let Ok(slot) = self.recv_task.get_mut() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

// ── Receive loop ──────────────────────────────────────────────────────────────

async fn receive_loop(
    socket: Arc<UdpSocket>,
    max_datagram_size: usize,
    last_peer: Arc<Mutex<Option<PeerSighting>>>,
    tx: mpsc::Sender<UdpDatagram>,
) {
    let mut buf = vec![0u8; max_datagram_size.max(1)];

    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                // e.g. ICMP port-unreachable reported on some platforms after
                // a send to a vanished peer.  The socket itself is still fine.
                debug!("UDP recv error on {:?} (ignored): {e}", socket.local_addr());
                continue;
            }
        };

        *lock(&last_peer) = Some(PeerSighting {
            addr: source,
            seen_at: Instant::now(),
        });

        let datagram = UdpDatagram {
            bytes: buf[..len].to_vec(),
            source,
        };
        if tx.send(datagram).await.is_err() {
            warn!("UDP inbound channel closed; stopping receive loop");
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

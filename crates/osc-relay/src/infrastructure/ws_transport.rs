//! WebSocket transport: accept loop and per-connection tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections and upgrading each to a WebSocket.
//! 3. Giving every connection a [`ConnectionId`] and a bounded outbound queue.
//! 4. Emitting every binary frame received from any connection on one inbound
//!    channel, tagged with the connection it came from.
//! 5. Fanning frames out to all connections ([`WsTransport::broadcast`]) or to
//!    one ([`WsTransport::send_to`]).
//! 6. Shutting everything down when [`WsTransport::close`] is called.
//!
//! # Failure isolation
//!
//! Each connection runs in its own task.  A failed handshake, a protocol
//! violation, or an abrupt disconnect ends that task only; the listener and
//! the other connections are unaffected.  A slow client fills its own queue
//! and misses frames; it never stalls a broadcast.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use crate::domain::{BridgeConfig, ConnectionId};
use crate::infrastructure::{lock, TransportError};

/// One binary frame received from a WebSocket client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    pub bytes: Vec<u8>,
    pub connection: ConnectionId,
}

/// Settings for one WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsOptions {
    pub inbound_capacity: usize,
    pub client_queue_depth: usize,
    pub close_grace: Duration,
}

impl From<&BridgeConfig> for WsOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            inbound_capacity: config.inbound_capacity,
            client_queue_depth: config.client_queue_depth,
            close_grace: config.close_grace,
        }
    }
}

impl Default for WsOptions {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

struct ClientHandle {
    peer_addr: SocketAddr,
    outbound: mpsc::Sender<WsMessage>,
}

type ClientMap = Arc<Mutex<HashMap<ConnectionId, ClientHandle>>>;

/// A listening WebSocket transport.
pub struct WsTransport {
    local_addr: SocketAddr,
    clients: ClientMap,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WsTransport {
    /// Binds `addr` and starts accepting WebSocket connections.
    ///
    /// Returns the transport and the receiver on which frames from all
    /// connections arrive.  Frames from one connection arrive in the order
    /// that connection sent them.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the listener cannot be bound.
    pub async fn listen(
        addr: SocketAddr,
        options: &WsOptions,
    ) -> Result<(Self, mpsc::Receiver<WsFrame>), TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        let clients: ClientMap = Arc::new(Mutex::new(HashMap::new()));
        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&clients),
            inbound_tx,
            shutdown_rx,
            options.clone(),
        ));

        info!("WebSocket transport listening on {local_addr}");

        Ok((
            Self {
                local_addr,
                clients,
                shutdown: shutdown_tx,
                accept_task: Mutex::new(Some(accept_task)),
                closed: AtomicBool::new(false),
            },
            inbound_rx,
        ))
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of connections that completed the handshake and are still open.
    pub fn connection_count(&self) -> usize {
        lock(&self.clients).len()
    }

    /// Handles and remote addresses of every active connection.
    pub fn connections(&self) -> Vec<(ConnectionId, SocketAddr)> {
        lock(&self.clients)
            .iter()
            .map(|(id, client)| (*id, client.peer_addr))
            .collect()
    }

    /// Queues `bytes` as a binary frame for every connected client.
    ///
    /// Returns how many clients the frame was queued for.  After `close()`
    /// this is a no-op returning 0.
    pub fn broadcast(&self, bytes: &[u8]) -> usize {
        if self.is_closed() {
            return 0;
        }

        let clients = lock(&self.clients);
        let mut queued = 0;
        for (id, client) in clients.iter() {
            match client.outbound.try_send(WsMessage::Binary(bytes.to_vec())) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("WebSocket client {id} ({}) is not keeping up; frame dropped", client.peer_addr);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("WebSocket client {id} is disconnecting; frame not queued");
                }
            }
        }
        queued
    }

    /// Queues `bytes` as a binary frame for one client.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Closed`] after `close()`.
    /// - [`TransportError::UnknownConnection`] if `connection` is not active.
    /// - [`TransportError::QueueFull`] if the client's queue is full.
    pub fn send_to(&self, bytes: &[u8], connection: ConnectionId) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let clients = lock(&self.clients);
        let client = clients
            .get(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        client
            .outbound
            .try_send(WsMessage::Binary(bytes.to_vec()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(connection),
                mpsc::error::TrySendError::Closed(_) => {
                    TransportError::UnknownConnection(connection)
                }
            })
    }

    /// Closes every connection and the listening socket.
    ///
    /// Returns once all connection tasks have ended and the listener has been
    /// dropped.  Calling `close` again does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Receivers may already be gone if the accept loop died; that is fine.
        let _ = self.shutdown.send(true);

        let task = lock(&self.accept_task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("WebSocket accept loop panicked: {e}");
                }
            }
        }
        lock(&self.clients).clear();

        info!("WebSocket transport on {} closed", self.local_addr);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        // Aborting the accept loop drops its JoinSet, which aborts every
        // connection task with it.
        if let Ok(slot) = self.accept_task.get_mut() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    clients: ClientMap,
    inbound: mpsc::Sender<WsFrame>,
    mut shutdown: watch::Receiver<bool>,
    options: WsOptions,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            // Also fires if the transport was dropped without close().
            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("incoming WebSocket connection from {peer_addr}");
                    sessions.spawn(handle_connection(
                        stream,
                        peer_addr,
                        Arc::clone(&clients),
                        inbound.clone(),
                        shutdown.clone(),
                        options.client_queue_depth,
                    ));
                }
                Err(e) => {
                    // Transient accept error (e.g., too many open file descriptors).
                    // Log it and continue rather than tearing down the listener.
                    error!("WebSocket accept error: {e}");
                }
            },

            // Reap finished sessions so the set does not grow without bound.
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("WebSocket connection task panicked: {e}");
                    }
                }
            }
        }
    }

    // Stop accepting before waiting for the connections to wind down.
    drop(listener);

    let drained = timeout(options.close_grace, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "{} WebSocket connections did not close within {:?}; aborting them",
            sessions.len(),
            options.close_grace
        );
        sessions.shutdown().await;
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Top-level handler for one WebSocket connection.
///
/// Performs the handshake, registers the connection, serves it until either
/// side ends it, and then deregisters it.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    clients: ClientMap,
    inbound: mpsc::Sender<WsFrame>,
    mut shutdown: watch::Receiver<bool>,
    queue_depth: usize,
) {
    // A client that never sends its upgrade request must not hold up close().
    let ws_stream = tokio::select! {
        biased;
        _ = shutdown.changed() => return,
        result = accept_async(stream) => match result {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake with {peer_addr} failed: {e}");
                return;
            }
        },
    };

    let id = ConnectionId::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(queue_depth.max(1));
    lock(&clients).insert(
        id,
        ClientHandle {
            peer_addr,
            outbound: outbound_tx,
        },
    );
    info!("WebSocket client {id} connected from {peer_addr}");

    let result = serve_connection(id, ws_stream, outbound_rx, &inbound, &mut shutdown).await;

    lock(&clients).remove(&id);
    match result {
        Ok(()) => info!("WebSocket client {id} ({peer_addr}) disconnected"),
        Err(e) => warn!("WebSocket client {id} ({peer_addr}) dropped: {e}"),
    }
}

/// Pumps frames in both directions for one connection.
///
/// Returns `Ok(())` on an orderly close from either side and `Err` when the
/// connection failed.  Either way only this connection is affected.
async fn serve_connection(
    id: ConnectionId,
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    mut outbound: mpsc::Receiver<WsMessage>,
    inbound: &mpsc::Sender<WsFrame>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), WsError> {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        // Shutdown is checked first: frames still queued when the transport
        // closes are discarded, not sent ahead of the Close frame.
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                // Best effort: the peer may already be gone.
                let _ = sink.send(WsMessage::Close(None)).await;
                return Ok(());
            }

            queued = outbound.recv() => {
                let Some(message) = queued else {
                    return Ok(());
                };
                sink.send(message).await?;
            }

            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Binary(bytes))) => {
                    let frame = WsFrame { bytes, connection: id };
                    if inbound.send(frame).await.is_err() {
                        debug!("WebSocket client {id}: inbound channel closed");
                        return Ok(());
                    }
                }
                Some(Ok(WsMessage::Text(text))) => {
                    // OSC is binary; text frames have no defined meaning here.
                    warn!("WebSocket client {id}: ignoring text frame ({} bytes)", text.len());
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {
                    // tungstenite answers pings itself on the next read/write.
                }
                Some(Err(WsError::ConnectionClosed)) => return Ok(()),
                Some(Err(e)) => return Err(e),
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Bridge lifecycle: owns the one active {UDP, WebSocket} transport pair.
//!
//! ```text
//! start(port)
//!   ├── close the previous instance (if any) and wait for its ports to free
//!   ├── open UdpTransport on 0.0.0.0:port
//!   ├── open WsTransport on the configured bind address
//!   ├── spawn forward_udp_to_ws + forward_ws_to_udp
//!   └── true
//! ```
//!
//! Every lifecycle transition runs under one async mutex, so two `start`
//! calls never interleave their teardown and setup.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::forwarding::{forward_udp_to_ws, forward_ws_to_udp, RelayStats};
use crate::domain::{BridgeConfig, BridgeStatus, LifecycleState};
use crate::infrastructure::{
    lock, TransportError, UdpOptions, UdpTransport, WsOptions, WsTransport,
};

/// One running transport pair and its forwarders.
struct BridgeInstance {
    udp: Arc<UdpTransport>,
    ws: Arc<WsTransport>,
    forwarders: Vec<JoinHandle<()>>,
    stats: Arc<RelayStats>,
}

impl BridgeInstance {
    async fn open(port: u16, config: &BridgeConfig) -> Result<Self, TransportError> {
        let (udp, udp_inbound) = UdpTransport::open(port, &UdpOptions::from(config)).await?;
        let (ws, ws_inbound) =
            match WsTransport::listen(config.ws_bind_addr, &WsOptions::from(config)).await {
                Ok(opened) => opened,
                Err(e) => {
                    // Release the UDP port before reporting failure.
                    udp.close().await;
                    return Err(e);
                }
            };

        let udp = Arc::new(udp);
        let ws = Arc::new(ws);
        let stats = Arc::new(RelayStats::default());

        let forwarders = vec![
            tokio::spawn(forward_udp_to_ws(
                udp_inbound,
                Arc::clone(&ws),
                Arc::clone(&stats),
            )),
            tokio::spawn(forward_ws_to_udp(
                ws_inbound,
                Arc::clone(&udp),
                config.udp_target,
                Arc::clone(&stats),
            )),
        ];

        Ok(Self {
            udp,
            ws,
            forwarders,
            stats,
        })
    }

    /// Stops forwarding, then closes both transports.
    ///
    /// The forwarders are stopped first so that nothing is delivered through
    /// an instance that is shutting down.
    async fn shutdown(mut self) {
        for task in std::mem::take(&mut self.forwarders) {
            task.abort();
            let _ = task.await;
        }
        self.udp.close().await;
        self.ws.close().await;
    }

    fn status(&self, state: LifecycleState) -> BridgeStatus {
        BridgeStatus {
            state,
            udp_addr: Some(self.udp.local_addr()),
            ws_addr: Some(self.ws.local_addr()),
            ws_clients: self.ws.connection_count(),
            last_udp_peer: self.udp.last_peer(),
            counters: self.stats.snapshot(),
        }
    }
}

impl Drop for BridgeInstance {
    fn drop(&mut self) {
        // The forwarders hold the only other references to the transports.
        for task in &self.forwarders {
            task.abort();
        }
    }
}

/// Owns the lifecycle of the relay.
///
/// There is no global instance; whoever runs the relay creates a controller
/// and passes it (usually in an `Arc`) to everything that needs it.
pub struct BridgeController {
    config: BridgeConfig,
    active: tokio::sync::Mutex<Option<BridgeInstance>>,
    // Readable without waiting for an in-progress start.
    state: Mutex<LifecycleState>,
}

impl BridgeController {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            active: tokio::sync::Mutex::new(None),
            state: Mutex::new(LifecycleState::Stopped),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Starts relaying between UDP `port` and the WebSocket listener.
    ///
    /// Any running instance is closed first, and its ports are free again
    /// before the new ones are bound.  Returns `false` if either socket
    /// could not be bound; the controller is then in
    /// [`LifecycleState::Failed`] with nothing bound.
    ///
    /// `port` is only checked for bindability.  Range policy is applied by
    /// the caller (see [`crate::application::control::parse_port`]).
    pub async fn start(&self, port: u16) -> bool {
        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            info!("Closing existing OSC Relay Server.");
            previous.shutdown().await;
            self.set_state(LifecycleState::Stopped);
        }

        self.set_state(LifecycleState::Starting);
        match BridgeInstance::open(port, &self.config).await {
            Ok(instance) => {
                info!(
                    "OSC relay running: UDP {} <-> WebSocket {}",
                    instance.udp.local_addr(),
                    instance.ws.local_addr()
                );
                *active = Some(instance);
                self.set_state(LifecycleState::Running);
                true
            }
            Err(e) => {
                error!("failed to start OSC relay on UDP port {port}: {e}");
                self.set_state(LifecycleState::Failed);
                false
            }
        }
    }

    /// Closes the active instance, if any.  Calling `stop` when nothing is
    /// running resets a failed controller to `Stopped`.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        if let Some(instance) = active.take() {
            info!("stopping OSC relay");
            instance.shutdown().await;
        }
        self.set_state(LifecycleState::Stopped);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    /// Health report for the active instance.
    ///
    /// Waits for an in-progress `start` or `stop` to finish.
    pub async fn status(&self) -> BridgeStatus {
        let active = self.active.lock().await;
        let state = self.state();
        match active.as_ref() {
            Some(instance) => instance.status(state),
            None => BridgeStatus {
                state,
                ..BridgeStatus::default()
            },
        }
    }

    fn set_state(&self, state: LifecycleState) {
        *lock(&self.state) = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    const WAIT: Duration = Duration::from_secs(2);

    fn loopback_config() -> BridgeConfig {
        BridgeConfig {
            ws_bind_addr: "127.0.0.1:0".parse().unwrap(),
            close_grace: Duration::from_millis(100),
            ..BridgeConfig::default()
        }
    }

    /// Handles to the running instance's transports.
    async fn transports(controller: &BridgeController) -> (Arc<UdpTransport>, Arc<WsTransport>) {
        let active = controller.active.lock().await;
        let instance = active.as_ref().expect("relay is running");
        (Arc::clone(&instance.udp), Arc::clone(&instance.ws))
    }

    async fn wait_for_clients(ws: &WsTransport, n: usize) {
        timeout(WAIT, async {
            while ws.connection_count() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("clients did not register in time");
    }

    #[tokio::test]
    async fn test_new_controller_is_stopped_with_empty_status() {
        let controller = BridgeController::new(loopback_config());

        let status = controller.status().await;

        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(status, BridgeStatus::default());
    }

    #[tokio::test]
    async fn test_start_reports_bound_addresses() {
        // Arrange
        let controller = BridgeController::new(loopback_config());

        // Act
        let started = controller.start(0).await;
        let status = controller.status().await;

        // Assert
        assert!(started);
        assert_eq!(status.state, LifecycleState::Running);
        assert_ne!(status.udp_addr.unwrap().port(), 0);
        assert_ne!(status.ws_addr.unwrap().port(), 0);
        assert_eq!(status.ws_clients, 0);
        assert_eq!(status.last_udp_peer, None);
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_start_fails_when_port_is_taken() {
        let blocker = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let controller = BridgeController::new(loopback_config());

        assert!(!controller.start(port).await);
        assert_eq!(controller.state(), LifecycleState::Failed);
        assert_eq!(controller.status().await.udp_addr, None);
    }

    #[tokio::test]
    async fn test_ws_bind_failure_releases_udp_port() {
        // Arrange: the WebSocket address is already taken
        let ws_blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = BridgeConfig {
            ws_bind_addr: ws_blocker.local_addr().unwrap(),
            ..loopback_config()
        };
        let reserved = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let udp_port = reserved.local_addr().unwrap().port();
        drop(reserved);
        let controller = BridgeController::new(config);

        // Act
        let started = controller.start(udp_port).await;

        // Assert
        assert!(!started);
        assert!(std::net::UdpSocket::bind(("0.0.0.0", udp_port)).is_ok());
    }

    #[tokio::test]
    async fn test_stop_resets_failed_state() {
        let blocker = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let controller = BridgeController::new(loopback_config());
        controller.start(port).await;

        controller.stop().await;
        controller.stop().await;

        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_closing_udp_leaves_websocket_transport_working() {
        // Arrange: a running relay with one WebSocket client
        let controller = BridgeController::new(loopback_config());
        assert!(controller.start(0).await);
        let (udp, ws) = transports(&controller).await;
        let (mut client, _) = connect_async(format!("ws://{}", ws.local_addr()))
            .await
            .unwrap();
        wait_for_clients(&ws, 1).await;
        let (client_id, _) = ws.connections()[0];

        // Act
        udp.close().await;

        // Assert: broadcast and send_to still reach the client
        assert!(udp.is_closed());
        assert!(!ws.is_closed());
        assert_eq!(ws.broadcast(&[1, 2, 3, 4]), 1);
        let got = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(got, WsMessage::Binary(vec![1, 2, 3, 4]));
        ws.send_to(&[5, 6, 7, 8], client_id).unwrap();
        let got = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(got, WsMessage::Binary(vec![5, 6, 7, 8]));

        drop((udp, ws));
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_closing_websocket_leaves_udp_transport_working() {
        // Arrange: a running relay and a UDP peer
        let controller = BridgeController::new(loopback_config());
        assert!(controller.start(0).await);
        let (udp, ws) = transports(&controller).await;
        let relay_addr = SocketAddr::from(([127, 0, 0, 1], udp.local_addr().port()));
        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        // Act
        ws.close().await;

        // Assert: datagrams are still received and relayed
        assert!(ws.is_closed());
        assert!(!udp.is_closed());
        peer.send_to(b"/ping\0\0\0,\0\0\0", relay_addr).await.unwrap();
        timeout(WAIT, async {
            while controller.status().await.counters.udp_to_ws < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("datagram was not received");
        assert_eq!(udp.last_peer(), Some(peer_addr));

        // Assert: and sending still works
        udp.send(&[9, 9, 9, 9], peer_addr).await.unwrap();
        let mut buf = [0u8; 16];
        let (len, _) = timeout(WAIT, peer.recv_from(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[..len], &[9, 9, 9, 9]);

        drop((udp, ws));
        controller.stop().await;
    }
}

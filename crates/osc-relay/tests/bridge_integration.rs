//! End-to-end tests for the relay.
//!
//! Each test starts a real [`BridgeController`] on loopback with ephemeral
//! ports, then talks to it with plain UDP sockets and tokio-tungstenite
//! clients, the way an OSC controller and a browser would.
//!
//! ```text
//! UdpSocket (test) ──datagram──▶ relay UDP port ──▶ WS clients (test)
//! WS client (test) ──frame────▶ relay WS port  ──▶ last UDP sender (test)
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use osc_relay::application::{handle_start, ControlResponse};
use osc_relay::domain::{BridgeConfig, LifecycleState};
use osc_relay::BridgeController;
use osc_relay_core::{decode_packet, encode_packet, Framing, OscArg, OscMessage, OscPacket};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

/// `/test 1 "hi"` as a UDP controller would send it.
const TEST_1_HI: &[u8] = b"/test\0\0\0,is\0\0\0\0\x01hi\0\0";

// ── Helpers ───────────────────────────────────────────────────────────────────

fn loopback_config() -> BridgeConfig {
    BridgeConfig {
        ws_bind_addr: "127.0.0.1:0".parse().unwrap(),
        close_grace: Duration::from_millis(200),
        ..BridgeConfig::default()
    }
}

/// `N` distinct UDP ports that were free a moment ago.
fn free_udp_ports<const N: usize>() -> [u16; N] {
    let sockets: Vec<std::net::UdpSocket> = (0..N)
        .map(|_| std::net::UdpSocket::bind("0.0.0.0:0").unwrap())
        .collect();
    std::array::from_fn(|i| sockets[i].local_addr().unwrap().port())
}

/// Starts a controller on an ephemeral UDP port.
///
/// Returns the controller plus the loopback addresses to reach it on.
async fn start_relay(config: BridgeConfig) -> (BridgeController, SocketAddr, SocketAddr) {
    let controller = BridgeController::new(config);
    assert!(controller.start(0).await, "relay must start");
    let status = controller.status().await;
    let udp = SocketAddr::from(([127, 0, 0, 1], status.udp_addr.unwrap().port()));
    let ws = status.ws_addr.unwrap();
    (controller, udp, ws)
}

async fn connect_clients(controller: &BridgeController, ws: SocketAddr, n: usize) -> Vec<WsClient> {
    let mut clients = Vec::with_capacity(n);
    for _ in 0..n {
        let (client, _) = connect_async(format!("ws://{ws}")).await.unwrap();
        clients.push(client);
    }
    // The handshake completes before the relay registers the connection.
    timeout(WAIT, async {
        while controller.status().await.ws_clients < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("clients did not register in time");
    clients
}

async fn next_binary(client: &mut WsClient) -> Vec<u8> {
    loop {
        let message = timeout(WAIT, client.next())
            .await
            .expect("no frame within timeout")
            .expect("stream ended")
            .expect("WebSocket error");
        if let WsMessage::Binary(bytes) = message {
            return bytes;
        }
    }
}

async fn udp_peer() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn recv_datagram(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 2048];
    let (len, _) = timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("no datagram within timeout")
        .unwrap();
    buf.truncate(len);
    buf
}

fn osc(address: &str, args: Vec<OscArg>) -> Vec<u8> {
    let packet = OscPacket::from(OscMessage::new(address, args).unwrap());
    encode_packet(&packet, Framing::WebSocket)
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_udp_message_reaches_websocket_client() {
    // Arrange
    let (controller, udp_addr, ws_addr) = start_relay(loopback_config()).await;
    let mut clients = connect_clients(&controller, ws_addr, 1).await;
    let sender = udp_peer().await;

    // Act
    sender.send_to(TEST_1_HI, udp_addr).await.unwrap();
    let frame = next_binary(&mut clients[0]).await;

    // Assert
    let OscPacket::Message(msg) = decode_packet(&frame, Framing::WebSocket).unwrap() else {
        panic!("expected a message");
    };
    assert_eq!(msg.address(), "/test");
    assert_eq!(msg.args(), &[OscArg::Int(1), OscArg::String("hi".into())]);
    controller.stop().await;
}

#[tokio::test]
async fn test_start_returns_false_when_udp_port_is_bound_elsewhere() {
    let blocker = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
    let port = blocker.local_addr().unwrap().port();
    let controller = BridgeController::new(loopback_config());

    assert!(!controller.start(port).await);
    assert_eq!(controller.state(), LifecycleState::Failed);
}

#[tokio::test]
async fn test_replacement_start_releases_previous_port() {
    // Arrange
    let [first_port, second_port] = free_udp_ports();
    let controller = BridgeController::new(loopback_config());
    assert!(controller.start(first_port).await);

    // Act
    assert!(controller.start(second_port).await);

    // Assert: the old port is free, the new one is in use
    assert!(std::net::UdpSocket::bind(("0.0.0.0", first_port)).is_ok());
    assert!(std::net::UdpSocket::bind(("0.0.0.0", second_port)).is_err());
    assert_eq!(controller.status().await.udp_addr.unwrap().port(), second_port);
    controller.stop().await;
}

#[tokio::test]
async fn test_restart_on_same_port_succeeds() {
    let [port] = free_udp_ports();
    let controller = BridgeController::new(loopback_config());

    assert!(controller.start(port).await);
    assert!(controller.start(port).await);

    assert_eq!(controller.state(), LifecycleState::Running);
    controller.stop().await;
}

#[tokio::test]
async fn test_replacement_disconnects_old_websocket_clients() {
    let (controller, _, ws_addr) = start_relay(loopback_config()).await;
    let mut clients = connect_clients(&controller, ws_addr, 1).await;

    assert!(controller.start(0).await);

    // The old connection is closed; nothing more arrives on it.
    let next = timeout(WAIT, clients[0].next()).await.unwrap();
    assert!(matches!(next, Some(Ok(WsMessage::Close(_))) | None | Some(Err(_))));
    controller.stop().await;
}

#[tokio::test]
async fn test_stop_releases_both_ports_and_is_idempotent() {
    let [port] = free_udp_ports();
    let controller = BridgeController::new(loopback_config());
    assert!(controller.start(port).await);
    let ws_addr = controller.status().await.ws_addr.unwrap();

    controller.stop().await;
    controller.stop().await;

    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(std::net::UdpSocket::bind(("0.0.0.0", port)).is_ok());
    assert!(std::net::TcpListener::bind(ws_addr).is_ok());
}

// ── Forwarding ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_malformed_datagram_does_not_stop_the_relay() {
    // Arrange
    let (controller, udp_addr, ws_addr) = start_relay(loopback_config()).await;
    let mut clients = connect_clients(&controller, ws_addr, 1).await;
    let sender = udp_peer().await;

    // Act: garbage first, then a well-formed packet
    sender.send_to(b"no leading slash\0\0\0\0", udp_addr).await.unwrap();
    sender.send_to(TEST_1_HI, udp_addr).await.unwrap();

    // Assert: only the good packet arrives, and the client is still connected
    assert_eq!(next_binary(&mut clients[0]).await, TEST_1_HI);
    let status = controller.status().await;
    assert_eq!(status.counters.decode_errors, 1);
    assert_eq!(status.counters.udp_to_ws, 1);
    assert_eq!(status.ws_clients, 1);
    controller.stop().await;
}

#[tokio::test]
async fn test_broadcast_fans_out_identical_frames_to_every_client() {
    // Arrange
    let (controller, udp_addr, ws_addr) = start_relay(loopback_config()).await;
    let mut clients = connect_clients(&controller, ws_addr, 3).await;
    let sender = udp_peer().await;
    let datagram = osc("/mixer/fader/1", vec![OscArg::Float(0.75)]);

    // Act
    sender.send_to(&datagram, udp_addr).await.unwrap();

    // Assert: exactly one identical frame per client
    for client in &mut clients {
        assert_eq!(next_binary(client).await, datagram);
        assert!(timeout(Duration::from_millis(100), client.next()).await.is_err());
    }
    controller.stop().await;
}

#[tokio::test]
async fn test_websocket_message_goes_to_most_recent_udp_sender() {
    // Arrange: sender A, then sender B
    let (controller, udp_addr, ws_addr) = start_relay(loopback_config()).await;
    let mut clients = connect_clients(&controller, ws_addr, 1).await;
    let peer_a = udp_peer().await;
    let peer_b = udp_peer().await;

    peer_a.send_to(&osc("/from/a", vec![]), udp_addr).await.unwrap();
    next_binary(&mut clients[0]).await;
    peer_b.send_to(&osc("/from/b", vec![]), udp_addr).await.unwrap();
    next_binary(&mut clients[0]).await;

    // Act
    let reply = osc("/reply", vec![OscArg::Int(42)]);
    clients[0].send(WsMessage::Binary(reply.clone())).await.unwrap();

    // Assert: B receives it, A does not
    assert_eq!(recv_datagram(&peer_b).await, reply);
    let mut buf = [0u8; 64];
    assert!(timeout(Duration::from_millis(150), peer_a.recv_from(&mut buf)).await.is_err());
    let status = controller.status().await;
    assert_eq!(status.last_udp_peer, Some(peer_b.local_addr().unwrap()));
    assert_eq!(status.counters.ws_to_udp, 1);
    controller.stop().await;
}

#[tokio::test]
async fn test_websocket_message_without_udp_peer_is_dropped() {
    let (controller, _, ws_addr) = start_relay(loopback_config()).await;
    let mut clients = connect_clients(&controller, ws_addr, 1).await;

    clients[0].send(WsMessage::Binary(osc("/orphan", vec![]))).await.unwrap();

    timeout(WAIT, async {
        while controller.status().await.counters.dropped_no_peer < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("drop was not counted");
    assert_eq!(controller.status().await.ws_clients, 1);
    controller.stop().await;
}

#[tokio::test]
async fn test_malformed_websocket_frame_keeps_connection_open() {
    let (controller, udp_addr, ws_addr) = start_relay(loopback_config()).await;
    let mut clients = connect_clients(&controller, ws_addr, 1).await;
    let peer = udp_peer().await;
    peer.send_to(TEST_1_HI, udp_addr).await.unwrap();
    next_binary(&mut clients[0]).await;

    clients[0].send(WsMessage::Binary(vec![0xFF; 3])).await.unwrap();
    let good = osc("/still/here", vec![]);
    clients[0].send(WsMessage::Binary(good.clone())).await.unwrap();

    assert_eq!(recv_datagram(&peer).await, good);
    assert_eq!(controller.status().await.counters.decode_errors, 1);
    controller.stop().await;
}

#[tokio::test]
async fn test_idle_udp_peer_is_forgotten() {
    // Arrange
    let config = BridgeConfig {
        peer_idle_timeout: Some(Duration::from_millis(100)),
        ..loopback_config()
    };
    let (controller, udp_addr, ws_addr) = start_relay(config).await;
    let mut clients = connect_clients(&controller, ws_addr, 1).await;
    let peer = udp_peer().await;
    peer.send_to(TEST_1_HI, udp_addr).await.unwrap();
    next_binary(&mut clients[0]).await;
    assert!(controller.status().await.last_udp_peer.is_some());

    // Act
    tokio::time::sleep(Duration::from_millis(250)).await;

    // Assert
    assert_eq!(controller.status().await.last_udp_peer, None);
    controller.stop().await;
}

#[tokio::test]
async fn test_websocket_message_without_peer_goes_to_configured_target() {
    // Arrange: a fixed target, and no UDP sender has been seen
    let target = udp_peer().await;
    let config = BridgeConfig {
        udp_target: Some(target.local_addr().unwrap()),
        ..loopback_config()
    };
    let (controller, _, ws_addr) = start_relay(config).await;
    let mut clients = connect_clients(&controller, ws_addr, 1).await;

    // Act
    let cue = osc("/cue/go", vec![OscArg::Int(3)]);
    clients[0].send(WsMessage::Binary(cue.clone())).await.unwrap();

    // Assert
    assert_eq!(recv_datagram(&target).await, cue);
    let status = controller.status().await;
    assert_eq!(status.last_udp_peer, None);
    assert_eq!(status.counters.ws_to_udp, 1);
    assert_eq!(status.counters.dropped_no_peer, 0);
    controller.stop().await;
}

#[tokio::test]
async fn test_live_udp_peer_takes_precedence_over_configured_target() {
    // Arrange: a fixed target plus a live sender
    let target = udp_peer().await;
    let config = BridgeConfig {
        udp_target: Some(target.local_addr().unwrap()),
        peer_idle_timeout: Some(Duration::from_millis(150)),
        ..loopback_config()
    };
    let (controller, udp_addr, ws_addr) = start_relay(config).await;
    let mut clients = connect_clients(&controller, ws_addr, 1).await;
    let live = udp_peer().await;
    live.send_to(TEST_1_HI, udp_addr).await.unwrap();
    next_binary(&mut clients[0]).await;

    // Act: one reply while the sender is live
    let first = osc("/reply", vec![OscArg::Int(1)]);
    clients[0].send(WsMessage::Binary(first.clone())).await.unwrap();

    // Assert: the live sender gets it, the target does not
    assert_eq!(recv_datagram(&live).await, first);
    let mut buf = [0u8; 64];
    assert!(timeout(Duration::from_millis(100), target.recv_from(&mut buf)).await.is_err());

    // Act: another reply once the sender has gone idle
    tokio::time::sleep(Duration::from_millis(300)).await;
    let second = osc("/reply", vec![OscArg::Int(2)]);
    clients[0].send(WsMessage::Binary(second.clone())).await.unwrap();

    // Assert: the target takes over
    assert_eq!(recv_datagram(&target).await, second);
    assert!(timeout(Duration::from_millis(100), live.recv_from(&mut buf)).await.is_err());
    controller.stop().await;
}

// ── Control surface ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_handle_start_status_codes() {
    let controller = BridgeController::new(loopback_config());

    // Out of range is rejected before the controller sees it.
    assert_eq!(
        handle_start(&controller, "7000").await,
        ControlResponse::bad_request("Invalid port number")
    );
    assert_eq!(
        handle_start(&controller, "abc").await,
        ControlResponse::bad_request("Invalid port number")
    );
    assert_eq!(controller.state(), LifecycleState::Stopped);

    // Find an in-range port that is free, then one that is taken.
    let (port, blocker) = (8000u16..=11000)
        .find_map(|p| {
            let blocker = std::net::UdpSocket::bind(("0.0.0.0", p)).ok()?;
            Some((p, blocker))
        })
        .expect("some port in range is free");
    let response = handle_start(&controller, &port.to_string()).await;
    assert_eq!(
        response,
        ControlResponse::server_error(format!("Error starting OSC Bridge on {port}"))
    );

    drop(blocker);
    let response = handle_start(&controller, &port.to_string()).await;
    assert_eq!(
        response,
        ControlResponse::ok(format!("Success starting OSC Bridge on {port}"))
    );
    controller.stop().await;
}

//! OSC relay entry point.
//!
//! This binary relays OSC packets between UDP peers (mixing desks, lighting
//! consoles, embedded controllers) and WebSocket clients (browsers).  A
//! packet received on the UDP port is broadcast to every WebSocket client; a
//! packet received from a WebSocket client is sent to the most recent UDP
//! sender.
//!
//! # Usage
//!
//! ```text
//! osc-relay [OPTIONS]
//!
//! Options:
//!   --udp-port <PORT>           UDP port to start on (8000-11000)
//!   --ws-bind  <IP>             WebSocket bind address [default: 0.0.0.0]
//!   --ws-port  <PORT>           WebSocket listener port [default: 8081]
//!   --peer-idle-timeout <SECS>  Forget the UDP peer after this long [default: 0 = never]
//!   --udp-target <ADDR>         UDP destination while no live peer is known
//! ```
//!
//! Without `--udp-port` the relay starts stopped and waits for a `start`
//! command on stdin.
//!
//! # Environment variable overrides
//!
//! | Variable                      | Default   | Description                  |
//! |-------------------------------|-----------|------------------------------|
//! | `OSC_RELAY_UDP_PORT`          | (none)    | UDP port to start on         |
//! | `OSC_RELAY_WS_BIND`           | `0.0.0.0` | WebSocket bind address       |
//! | `OSC_RELAY_WS_PORT`           | `8081`    | WebSocket listener port      |
//! | `OSC_RELAY_PEER_IDLE_TIMEOUT` | `0`       | UDP peer idle timeout (secs) |
//! | `OSC_RELAY_UDP_TARGET`        | (none)    | Fallback UDP destination     |
//!
//! WebSocket packets go to the most recent UDP sender.  `--udp-target` is
//! used only while there is none (before the first datagram, or once the
//! sender has been idle past `--peer-idle-timeout`).
//!
//! # Operator commands (stdin, one per line)
//!
//! ```text
//! start <port>   replace the running relay with one on <port>
//! status         print the health report
//! stop           close both transports
//! quit           stop and exit (Ctrl+C does the same)
//! ```
//!
//! Every reply is printed to stdout as one JSON line.  Logs go to stderr.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use osc_relay::application::{execute, handle_start, Command, ControlReply, ControlResponse};
use osc_relay::domain::BridgeConfig;
use osc_relay::BridgeController;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Bidirectional OSC relay between UDP and WebSocket.
#[derive(Debug, Parser)]
#[command(
    name = "osc-relay",
    about = "Relays OSC packets between UDP peers and WebSocket clients",
    version
)]
struct Cli {
    /// UDP port to start the relay on.
    ///
    /// Validated like a `start` command: it must be a number in 8000-11000.
    #[arg(long, env = "OSC_RELAY_UDP_PORT")]
    udp_port: Option<String>,

    /// IP address to bind the WebSocket server to.
    #[arg(long, default_value = "0.0.0.0", env = "OSC_RELAY_WS_BIND")]
    ws_bind: String,

    /// TCP port for the WebSocket server to listen on.
    #[arg(long, default_value_t = osc_relay::domain::config::DEFAULT_WS_PORT, env = "OSC_RELAY_WS_PORT")]
    ws_port: u16,

    /// Seconds of silence after which the last UDP sender is forgotten.
    ///
    /// `0` keeps the last sender until another one appears.
    #[arg(long, default_value_t = 0, env = "OSC_RELAY_PEER_IDLE_TIMEOUT")]
    peer_idle_timeout: u64,

    /// UDP address to send WebSocket packets to when no live sender is known.
    ///
    /// The most recent UDP sender always takes precedence.
    #[arg(long, env = "OSC_RELAY_UDP_TARGET")]
    udp_target: Option<SocketAddr>,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--ws-bind` is not a valid IP address.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let ws_ip: IpAddr = self
            .ws_bind
            .parse()
            .with_context(|| format!("invalid WebSocket bind address: '{}'", self.ws_bind))?;
        let ws_bind_addr = SocketAddr::new(ws_ip, self.ws_port);

        let peer_idle_timeout =
            (self.peer_idle_timeout > 0).then(|| Duration::from_secs(self.peer_idle_timeout));

        Ok(BridgeConfig {
            ws_bind_addr,
            peer_idle_timeout,
            udp_target: self.udp_target,
            ..BridgeConfig::default()
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only JSON replies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let initial_port = cli.udp_port.clone();
    let config = cli.into_bridge_config()?;

    info!("OSC relay starting: ws={}", config.ws_bind_addr);
    if let Some(target) = config.udp_target {
        info!("UDP target {target} is used while no live UDP sender is known");
    }

    let controller = Arc::new(BridgeController::new(config));

    if let Some(raw) = initial_port {
        let response = handle_start(&controller, &raw).await;
        print_reply(&ControlReply::Response(response))?;
    }

    run_command_loop(&controller).await?;

    controller.stop().await;
    info!("OSC relay stopped");
    Ok(())
}

/// Reads operator commands from stdin until `quit`, end of input or Ctrl+C.
async fn run_command_loop(controller: &BridgeController) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("received Ctrl+C, shutting down");
                return Ok(());
            }
            line = lines.next_line() => line.context("failed to read from stdin")?,
        };

        // End of input: keep relaying until Ctrl+C, as a service would.
        let Some(line) = line else {
            info!("stdin closed; press Ctrl+C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl+C")?;
            return Ok(());
        };

        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                warn!("{e}");
                print_reply(&ControlReply::Response(ControlResponse::bad_request(
                    e.to_string(),
                )))?;
                continue;
            }
        };

        let quit = command == Command::Quit;
        print_reply(&execute(controller, command).await)?;
        if quit {
            return Ok(());
        }
    }
}

fn print_reply(reply: &ControlReply) -> anyhow::Result<()> {
    let json = serde_json::to_string(reply).context("failed to serialise reply")?;
    println!("{json}");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

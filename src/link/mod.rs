//! # Socket Engine
//!
//! Owns every datagram endpoint of the workstation: the FMS and radio
//! channels, the robot single sender, and the parallel receiver pool that
//! discovers the robot by probing candidate addresses.
//!
//! ## Discovery
//!
//! Until the robot address is known, [`SocketLink::send_to_robot`] fans
//! each packet out across a window of the candidate list (one send per
//! pool slot) and then rotates the window. The first non-empty datagram
//! that lands on a pool receiver locks the engine onto its source address:
//! fan-out stops and subsequent sends go to that peer alone. Scan speed is
//! therefore set by the packet cadence of the caller times the pool size.
//!
//! ## Threading
//!
//! All engine state lives on one spawned task. [`SocketLink`] is a clonable
//! command-channel front; received packets come back on the event channel
//! returned by [`SocketLink::spawn`]. Handlers never block on the network:
//! sends are datagram writes, reads are pushed by per-socket reader tasks.

use std::net::Ipv4Addr;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::net::{TcpListener, TcpStream, UdpSocket};
use crate::SocketKind;

mod event_loop;

use event_loop::link_task;

// ============================================================================
// EVENTS AND COMMANDS
// ============================================================================

/// Packets and state changes reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A packet arrived on the FMS channel.
    FmsPacket(Bytes),
    /// A packet arrived on the radio channel.
    RadioPacket(Bytes),
    /// A packet arrived from the robot (via the pool or after lock-on).
    RobotPacket(Bytes),
    /// The scan locked onto a responding robot at this address.
    RobotDiscovered(Ipv4Addr),
}

/// Commands sent from the handle to the engine task.
pub(crate) enum Command {
    SendToFms(Bytes),
    SendToRadio(Bytes),
    SendToRobot(Bytes),
    SetRobotAddress(Option<Ipv4Addr>),
    SetRadioAddress(Option<Ipv4Addr>),
    SetAddressList(Vec<Ipv4Addr>),
    SetFmsInputPort(Option<u16>),
    SetFmsOutputPort(Option<u16>),
    SetRadioInputPort(Option<u16>),
    SetRadioOutputPort(Option<u16>),
    SetRobotInputPort(Option<u16>),
    SetRobotOutputPort(Option<u16>),
    SetCustomSocketCount(usize),
    SetFmsSocketKind(SocketKind),
    SetRadioSocketKind(SocketKind),
    SetRobotSocketKind(SocketKind),
    Shutdown,
}

// ============================================================================
// HANDLE
// ============================================================================

/// Handle to the socket engine task.
///
/// Cheap to clone; every method routes through the engine's command channel,
/// so callers on any task see a consistent engine. Methods only fail with
/// [`Error::LinkClosed`] once the engine has shut down; socket trouble is
/// logged and retried inside the engine, never surfaced here.
#[derive(Clone)]
pub struct SocketLink {
    cmd_tx: mpsc::Sender<Command>,
}

impl SocketLink {
    /// Spawn the engine on tokio sockets.
    pub fn spawn(config: LinkConfig) -> (Self, mpsc::Receiver<LinkEvent>) {
        Self::spawn_with::<tokio::net::UdpSocket, tokio::net::TcpStream, tokio::net::TcpListener>(
            config,
        )
    }

    /// Spawn the engine on a specific socket implementation.
    ///
    /// This is how tests run against the simulated network.
    pub fn spawn_with<U, T, L>(config: LinkConfig) -> (Self, mpsc::Receiver<LinkEvent>)
    where
        U: UdpSocket,
        T: TcpStream<Listener = L>,
        L: TcpListener<Stream = T>,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);

        tokio::spawn(link_task::<U, T, L>(config, cmd_rx, events_tx));

        (Self { cmd_tx }, events_rx)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| Error::LinkClosed)
    }

    fn validated(port: Option<u16>) -> Result<Option<u16>> {
        match port {
            Some(0) => Err(Error::InvalidPort(0)),
            other => Ok(other),
        }
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Send to the FMS. A no-op while the FMS output port is disabled.
    pub async fn send_to_fms(&self, data: Bytes) -> Result<()> {
        self.send(Command::SendToFms(data)).await
    }

    /// Send to the radio. A no-op until a radio address is set and the
    /// radio output port is enabled.
    pub async fn send_to_radio(&self, data: Bytes) -> Result<()> {
        self.send(Command::SendToRadio(data)).await
    }

    /// Send to the robot.
    ///
    /// With a known robot address this is a single unicast send; otherwise
    /// the packet fans out across the current probe window and the window
    /// rotates. A no-op while the robot output port is disabled.
    pub async fn send_to_robot(&self, data: Bytes) -> Result<()> {
        self.send(Command::SendToRobot(data)).await
    }

    // ------------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------------

    /// Lock the engine onto a robot address, or unlock it with `None` to
    /// resume scanning. Normally the scan sets this by itself.
    pub async fn set_robot_address(&self, address: Option<Ipv4Addr>) -> Result<()> {
        self.send(Command::SetRobotAddress(address)).await
    }

    /// Set the radio address; the radio receiver rebinds to it.
    pub async fn set_radio_address(&self, address: Option<Ipv4Addr>) -> Result<()> {
        self.send(Command::SetRadioAddress(address)).await
    }

    /// Replace the externally supplied candidate list. The LAN sweep is
    /// regenerated behind it and the pool is rebuilt.
    pub async fn set_address_list(&self, addresses: Vec<Ipv4Addr>) -> Result<()> {
        self.send(Command::SetAddressList(addresses)).await
    }

    // ------------------------------------------------------------------------
    // Ports
    // ------------------------------------------------------------------------

    pub async fn set_fms_input_port(&self, port: Option<u16>) -> Result<()> {
        self.send(Command::SetFmsInputPort(Self::validated(port)?))
            .await
    }

    pub async fn set_fms_output_port(&self, port: Option<u16>) -> Result<()> {
        self.send(Command::SetFmsOutputPort(Self::validated(port)?))
            .await
    }

    pub async fn set_radio_input_port(&self, port: Option<u16>) -> Result<()> {
        self.send(Command::SetRadioInputPort(Self::validated(port)?))
            .await
    }

    pub async fn set_radio_output_port(&self, port: Option<u16>) -> Result<()> {
        self.send(Command::SetRadioOutputPort(Self::validated(port)?))
            .await
    }

    /// Set the robot input port. The pool deliberately does not rebind
    /// right away; the new port takes effect at the next window rotation,
    /// which avoids churning up to 128 sockets mid-scan.
    pub async fn set_robot_input_port(&self, port: Option<u16>) -> Result<()> {
        self.send(Command::SetRobotInputPort(Self::validated(port)?))
            .await
    }

    pub async fn set_robot_output_port(&self, port: Option<u16>) -> Result<()> {
        self.send(Command::SetRobotOutputPort(Self::validated(port)?))
            .await
    }

    // ------------------------------------------------------------------------
    // Pool and transports
    // ------------------------------------------------------------------------

    /// Override the pool size (0 restores auto-sizing) and rebuild the pool.
    pub async fn set_custom_socket_count(&self, count: usize) -> Result<()> {
        self.send(Command::SetCustomSocketCount(count)).await
    }

    pub async fn set_fms_socket_kind(&self, kind: SocketKind) -> Result<()> {
        self.send(Command::SetFmsSocketKind(kind)).await
    }

    pub async fn set_radio_socket_kind(&self, kind: SocketKind) -> Result<()> {
        self.send(Command::SetRadioSocketKind(kind)).await
    }

    /// Change the robot sender transport. Only the single sender is
    /// replaced (with an eager connect for TCP); the pool is rebuilt by
    /// [`set_address_list`](Self::set_address_list) and
    /// [`set_custom_socket_count`](Self::set_custom_socket_count).
    pub async fn set_robot_socket_kind(&self, kind: SocketKind) -> Result<()> {
        self.send(Command::SetRobotSocketKind(kind)).await
    }

    /// Tear down every socket and stop the engine task.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

//! # Driver Station Orchestrator
//!
//! Glue between the socket engine and the 2015 protocol: a periodic tick
//! builds and ships the client packet, inbound link events are decoded into
//! telemetry, and the first contact with a robot kicks off the version-file
//! retrievals through the injected [`Fetcher`].
//!
//! Like the engine, the orchestrator runs on its own task behind a command
//! handle, so a GUI or CLI front end only ever touches [`DriverStation`]
//! and the [`DsEvent`] stream.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::link::{LinkEvent, SocketLink};
use crate::net::{TcpListener, TcpStream, UdpSocket};
use crate::proto2015::{self, wire, Protocol2015, ProtocolEvent};
use crate::{Alliance, ControlMode, Joystick};

/// Historical cadence of the driver station control loop.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Driver station configuration.
#[derive(Debug, Clone)]
pub struct DsConfig {
    /// Team number; derives the default robot hostname and radio address.
    pub team: u16,
    /// Engine configuration, pre-loaded with the 2015 port plan.
    pub link: LinkConfig,
    /// Control packet cadence (default: 20 ms).
    pub send_interval: Duration,
}

impl DsConfig {
    /// Configuration for a team, with the 2015 protocol's port plan.
    pub fn new(team: u16) -> Self {
        Self {
            team,
            link: LinkConfig::builder()
                .fms_input_port(wire::FMS_INPUT_PORT)
                .fms_output_port(wire::FMS_OUTPUT_PORT)
                .radio_input_port(wire::RADIO_INPUT_PORT)
                .robot_input_port(wire::ROBOT_INPUT_PORT)
                .robot_output_port(wire::ROBOT_OUTPUT_PORT)
                .build(),
            send_interval: DEFAULT_SEND_INTERVAL,
        }
    }
}

// ============================================================================
// EVENTS AND COMMANDS
// ============================================================================

/// Everything the front end needs to render a driver station.
#[derive(Debug, Clone, PartialEq)]
pub enum DsEvent {
    /// Battery voltage from the latest status packet.
    Voltage(f32),
    /// User code appeared or vanished.
    CodePresent(bool),
    /// The robot is running a different mode than requested.
    ControlModeEcho(ControlMode),
    PcmVersion(String),
    PdpVersion(String),
    LibVersion(String),
    /// The LAN scan found the robot.
    RobotDiscovered(Ipv4Addr),
    /// Raw FMS traffic, for a field-aware front end.
    FmsPacket(Bytes),
    /// Raw radio traffic.
    RadioPacket(Bytes),
}

impl From<ProtocolEvent> for DsEvent {
    fn from(event: ProtocolEvent) -> Self {
        match event {
            ProtocolEvent::Voltage(v) => DsEvent::Voltage(v),
            ProtocolEvent::CodePresent(c) => DsEvent::CodePresent(c),
            ProtocolEvent::ControlModeEcho(m) => DsEvent::ControlModeEcho(m),
            ProtocolEvent::PcmVersion(v) => DsEvent::PcmVersion(v),
            ProtocolEvent::PdpVersion(v) => DsEvent::PdpVersion(v),
            ProtocolEvent::LibVersion(v) => DsEvent::LibVersion(v),
        }
    }
}

enum DsCommand {
    SetTeam(u16),
    SetControlMode(ControlMode),
    SetAlliance(Alliance),
    SetJoysticks(Vec<Joystick>),
    Reboot,
    RestartCode,
    Reset,
    Shutdown,
}

// ============================================================================
// HANDLE
// ============================================================================

/// Handle to a running driver station.
#[derive(Clone)]
pub struct DriverStation {
    cmd_tx: mpsc::Sender<DsCommand>,
    link: SocketLink,
}

impl DriverStation {
    /// Spawn on tokio sockets.
    pub fn spawn(
        config: DsConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::Receiver<DsEvent>) {
        Self::spawn_with::<tokio::net::UdpSocket, tokio::net::TcpStream, tokio::net::TcpListener>(
            config, fetcher,
        )
    }

    /// Spawn on a specific socket implementation (tests use the simulated
    /// network).
    pub fn spawn_with<U, T, L>(
        config: DsConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::Receiver<DsEvent>)
    where
        U: UdpSocket,
        T: TcpStream<Listener = L>,
        L: TcpListener<Stream = T>,
    {
        let capacity = config.link.channel_capacity;
        let (link, link_events) = SocketLink::spawn_with::<U, T, L>(config.link.clone());
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let handle = Self {
            cmd_tx,
            link: link.clone(),
        };
        tokio::spawn(driver_task(
            config, fetcher, link, link_events, cmd_rx, events_tx,
        ));

        (handle, events_rx)
    }

    /// The underlying socket engine, for port/transport tuning.
    pub fn link(&self) -> &SocketLink {
        &self.link
    }

    async fn send(&self, command: DsCommand) -> Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| Error::LinkClosed)
    }

    pub async fn set_team(&self, team: u16) -> Result<()> {
        self.send(DsCommand::SetTeam(team)).await
    }

    pub async fn set_control_mode(&self, mode: ControlMode) -> Result<()> {
        self.send(DsCommand::SetControlMode(mode)).await
    }

    pub async fn set_alliance(&self, alliance: Alliance) -> Result<()> {
        self.send(DsCommand::SetAlliance(alliance)).await
    }

    /// Replace the joystick snapshots shipped with TeleOperated packets.
    pub async fn set_joysticks(&self, joysticks: Vec<Joystick>) -> Result<()> {
        self.send(DsCommand::SetJoysticks(joysticks)).await
    }

    /// Ask the robot controller to reboot.
    pub async fn reboot(&self) -> Result<()> {
        self.send(DsCommand::Reboot).await
    }

    /// Ask the robot controller to restart user code.
    pub async fn restart_code(&self) -> Result<()> {
        self.send(DsCommand::RestartCode).await
    }

    /// Return the protocol to its as-constructed state.
    pub async fn reset(&self) -> Result<()> {
        self.send(DsCommand::Reset).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(DsCommand::Shutdown).await
    }
}

// ============================================================================
// TASK
// ============================================================================

type FetchResult = (String, std::io::Result<Bytes>);

async fn driver_task(
    config: DsConfig,
    fetcher: Arc<dyn Fetcher>,
    link: SocketLink,
    mut link_events: mpsc::Receiver<LinkEvent>,
    mut cmd_rx: mpsc::Receiver<DsCommand>,
    events_tx: mpsc::Sender<DsEvent>,
) {
    let mut proto = Protocol2015::new(config.team);

    // Seed the engine: the derived radio address and an empty external list,
    // which triggers the LAN sweep and builds the scan pool.
    if let Ok(radio_ip) = proto.radio_address().parse::<Ipv4Addr>() {
        let _ = link.set_radio_address(Some(radio_ip)).await;
    }
    let _ = link.set_address_list(Vec::new()).await;

    let mut ticker = tokio::time::interval(config.send_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Version-file retrievals in flight; dropped wholesale on shutdown.
    let mut fetches: FuturesUnordered<BoxFuture<'static, FetchResult>> = FuturesUnordered::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(DsCommand::Shutdown) | None => {
                    let _ = link.shutdown().await;
                    break;
                }
                Some(cmd) => apply_command(&mut proto, cmd),
            },

            _ = ticker.tick() => {
                let packet = proto.generate_client_packet();
                if link.send_to_robot(packet).await.is_err() {
                    tracing::warn!("Socket engine gone, stopping driver");
                    break;
                }
            }

            event = link_events.recv() => match event {
                Some(LinkEvent::RobotPacket(data)) => {
                    let update = proto.read_robot_data(&data);
                    for event in update.events {
                        emit(&events_tx, event.into());
                    }
                    if update.newly_connected {
                        for url in proto.version_file_urls() {
                            let request = fetcher.get(&url);
                            fetches.push(async move { (url, request.await) }.boxed());
                        }
                    }
                }
                Some(LinkEvent::RobotDiscovered(ip)) => {
                    // Later version-file URLs should hit the discovered
                    // address rather than the mDNS hostname.
                    proto.set_robot_address(Some(ip.to_string()));
                    emit(&events_tx, DsEvent::RobotDiscovered(ip));
                }
                Some(LinkEvent::FmsPacket(data)) => emit(&events_tx, DsEvent::FmsPacket(data)),
                Some(LinkEvent::RadioPacket(data)) => emit(&events_tx, DsEvent::RadioPacket(data)),
                None => break,
            },

            Some((url, result)) = fetches.next(), if !fetches.is_empty() => {
                match result {
                    Ok(body) => {
                        if let Some(event) = proto2015::handle_version_file(&url, &body) {
                            emit(&events_tx, event.into());
                        }
                    }
                    Err(e) => tracing::debug!("Version file {url} unavailable: {e}"),
                }
            }
        }
    }
}

fn apply_command(proto: &mut Protocol2015, command: DsCommand) {
    match command {
        DsCommand::SetTeam(team) => proto.set_team(team),
        DsCommand::SetControlMode(mode) => proto.set_control_mode(mode),
        DsCommand::SetAlliance(alliance) => proto.set_alliance(alliance),
        DsCommand::SetJoysticks(joysticks) => proto.set_joysticks(joysticks),
        DsCommand::Reboot => proto.reboot(),
        DsCommand::RestartCode => proto.restart_code(),
        DsCommand::Reset => proto.reset(),
        DsCommand::Shutdown => unreachable!("handled by the loop"),
    }
}

fn emit(events_tx: &mpsc::Sender<DsEvent>, event: DsEvent) {
    match events_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!("Driver event channel full, dropping {event:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

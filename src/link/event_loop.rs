//! Engine event loop.
//!
//! One task owns every socket, the candidate address book and the peer
//! addresses. Commands arrive on an mpsc channel from [`SocketLink`];
//! datagrams arrive on a second channel fed by per-socket reader tasks,
//! each tagged with the endpoint (and pool slot) it came from. Nothing in
//! here is shared, so there are no locks.
//!
//! [`SocketLink`]: super::SocketLink

use std::marker::PhantomData;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Command, LinkEvent};
use crate::config::LinkConfig;
use crate::net::{TcpListener, TcpStream, UdpSocket};
use crate::scan::{AddressBook, Sweep};
use crate::SocketKind;

const READ_BUFFER_SIZE: usize = 4096;

fn any_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

// ============================================================================
// READERS
// ============================================================================

/// Which endpoint produced a datagram.
#[derive(Debug, Clone, Copy)]
enum Source {
    Fms,
    Radio,
    Robot { slot: usize },
}

/// A received datagram, posted by a reader task onto the loop's channel.
struct Incoming {
    source: Source,
    data: Bytes,
    from: SocketAddr,
}

fn spawn_udp_reader<U: UdpSocket>(
    socket: U,
    source: Source,
    tx: mpsc::Sender<Incoming>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, from)) => {
                    let incoming = Incoming {
                        source,
                        data: Bytes::copy_from_slice(&buf[..len]),
                        from,
                    };
                    if tx.send(incoming).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Error receiving packet: {e}");
                    break;
                }
            }
        }
    })
}

fn spawn_tcp_reader<T, L>(
    addr: SocketAddr,
    source: Source,
    tx: mpsc::Sender<Incoming>,
) -> JoinHandle<()>
where
    T: TcpStream<Listener = L>,
    L: TcpListener<Stream = T>,
{
    tokio::spawn(async move {
        let listener = match L::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!("Receiver failed to listen on {addr}: {e}");
                return;
            }
        };
        // One peer at a time; these channels carry a single well-known peer.
        loop {
            match listener.accept().await {
                Ok((mut stream, peer)) => {
                    let mut buf = [0u8; READ_BUFFER_SIZE];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) => break,
                            Ok(len) => {
                                let incoming = Incoming {
                                    source,
                                    data: Bytes::copy_from_slice(&buf[..len]),
                                    from: peer,
                                };
                                if tx.send(incoming).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::debug!("Stream from {peer} closed: {e}");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Accept failed on {addr}: {e}");
                    return;
                }
            }
        }
    })
}

// ============================================================================
// SENDERS
// ============================================================================

/// Outbound half of a singleton channel.
enum ChannelSender<U, T> {
    Udp(U),
    /// Stream slot; empty until an eager connect succeeds.
    Tcp(Option<T>),
}

impl<U: UdpSocket, T: TcpStream> ChannelSender<U, T> {
    async fn new(kind: SocketKind) -> Option<Self> {
        match kind {
            SocketKind::Udp => match U::bind(any_addr(0)).await {
                Ok(socket) => Some(Self::Udp(socket)),
                Err(e) => {
                    tracing::warn!("Failed to create sender socket: {e}");
                    None
                }
            },
            SocketKind::Tcp => Some(Self::Tcp(None)),
        }
    }

    async fn send(&mut self, data: &[u8], target: SocketAddr) -> std::io::Result<()> {
        match self {
            Self::Udp(socket) => socket.send_to(data, target).await.map(|_| ()),
            Self::Tcp(Some(stream)) => stream.write_all(data).await,
            Self::Tcp(None) => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "stream sender not connected",
            )),
        }
    }

    /// Eagerly (re)connect a TCP sender; a no-op for UDP.
    async fn connect(&mut self, target: SocketAddr) {
        if let Self::Tcp(slot) = self {
            match T::connect(target).await {
                Ok(stream) => *slot = Some(stream),
                Err(e) => {
                    *slot = None;
                    tracing::warn!("Failed to connect sender to {target}: {e}");
                }
            }
        }
    }
}

/// One slot of the parallel scan pool.
///
/// The receiver socket lives inside the reader task; the slot keeps only
/// the handle so a rotation can replace it.
struct PoolSlot<U> {
    sender: Option<U>,
    reader: Option<JoinHandle<()>>,
}

// ============================================================================
// ENGINE STATE
// ============================================================================

struct LinkState<U, T, L> {
    fms_input: Option<u16>,
    fms_output: Option<u16>,
    radio_input: Option<u16>,
    radio_output: Option<u16>,
    robot_input: Option<u16>,
    robot_output: Option<u16>,
    fms_kind: SocketKind,
    radio_kind: SocketKind,
    robot_kind: SocketKind,
    sweep: Sweep,
    book: AddressBook,
    robot_ip: Option<Ipv4Addr>,
    radio_ip: Option<Ipv4Addr>,
    fms_sender: Option<ChannelSender<U, T>>,
    radio_sender: Option<ChannelSender<U, T>>,
    robot_sender: Option<ChannelSender<U, T>>,
    fms_reader: Option<JoinHandle<()>>,
    radio_reader: Option<JoinHandle<()>>,
    pool: Vec<PoolSlot<U>>,
    incoming_tx: mpsc::Sender<Incoming>,
    events_tx: mpsc::Sender<LinkEvent>,
    _listener: PhantomData<L>,
}

pub(crate) async fn link_task<U, T, L>(
    config: LinkConfig,
    mut cmd_rx: mpsc::Receiver<Command>,
    events_tx: mpsc::Sender<LinkEvent>,
) where
    U: UdpSocket,
    T: TcpStream<Listener = L>,
    L: TcpListener<Stream = T>,
{
    let (incoming_tx, mut incoming_rx) = mpsc::channel(config.channel_capacity);
    let mut state = LinkState::<U, T, L>::new(config, incoming_tx, events_tx);
    state.startup().await;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Shutdown) | None => break,
                Some(cmd) => state.handle_command(cmd).await,
            },
            Some(incoming) = incoming_rx.recv() => state.handle_incoming(incoming),
        }
    }

    state.teardown();
    tracing::debug!("Socket engine stopped");
}

impl<U, T, L> LinkState<U, T, L>
where
    U: UdpSocket,
    T: TcpStream<Listener = L>,
    L: TcpListener<Stream = T>,
{
    fn new(
        config: LinkConfig,
        incoming_tx: mpsc::Sender<Incoming>,
        events_tx: mpsc::Sender<LinkEvent>,
    ) -> Self {
        let mut book = AddressBook::default();
        book.set_custom_socket_count(config.custom_socket_count);
        Self {
            fms_input: config.fms_input_port,
            fms_output: config.fms_output_port,
            radio_input: config.radio_input_port,
            radio_output: config.radio_output_port,
            robot_input: config.robot_input_port,
            robot_output: config.robot_output_port,
            fms_kind: config.fms_socket_kind,
            radio_kind: config.radio_socket_kind,
            robot_kind: config.robot_socket_kind,
            sweep: config.sweep,
            book,
            robot_ip: None,
            radio_ip: None,
            fms_sender: None,
            radio_sender: None,
            robot_sender: None,
            fms_reader: None,
            radio_reader: None,
            pool: Vec::new(),
            incoming_tx,
            events_tx,
            _listener: PhantomData,
        }
    }

    async fn startup(&mut self) {
        self.rebuild_fms_channel().await;
        self.rebuild_radio_channel().await;
        self.rebuild_robot_sender().await;
        // The pool waits for an address list.
        tracing::debug!("Socket engine initialized");
    }

    fn teardown(&mut self) {
        for reader in self
            .fms_reader
            .take()
            .into_iter()
            .chain(self.radio_reader.take())
        {
            reader.abort();
        }
        for slot in self.pool.drain(..) {
            if let Some(reader) = slot.reader {
                reader.abort();
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendToFms(data) => self.send_to_fms(data).await,
            Command::SendToRadio(data) => self.send_to_radio(data).await,
            Command::SendToRobot(data) => self.send_to_robot(data).await,
            Command::SetRobotAddress(address) => self.set_robot_address(address).await,
            Command::SetRadioAddress(address) => self.set_radio_address(address).await,
            Command::SetAddressList(addresses) => self.set_address_list(addresses).await,
            Command::SetFmsInputPort(port) => self.set_fms_input_port(port).await,
            Command::SetFmsOutputPort(port) => self.set_fms_output_port(port),
            Command::SetRadioInputPort(port) => self.set_radio_input_port(port).await,
            Command::SetRadioOutputPort(port) => self.set_radio_output_port(port).await,
            Command::SetRobotInputPort(port) => self.set_robot_input_port(port),
            Command::SetRobotOutputPort(port) => self.set_robot_output_port(port).await,
            Command::SetCustomSocketCount(count) => self.set_custom_socket_count(count).await,
            Command::SetFmsSocketKind(kind) => self.set_fms_socket_kind(kind).await,
            Command::SetRadioSocketKind(kind) => self.set_radio_socket_kind(kind).await,
            Command::SetRobotSocketKind(kind) => self.set_robot_socket_kind(kind).await,
            Command::Shutdown => unreachable!("handled by the loop"),
        }
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    async fn send_to_fms(&mut self, data: Bytes) {
        let Some(port) = self.fms_output else { return };
        let Some(sender) = self.fms_sender.as_mut() else {
            return;
        };
        if let Err(e) = sender.send(&data, any_addr(port)).await {
            tracing::warn!("FMS send failed: {e}");
        }
    }

    async fn send_to_radio(&mut self, data: Bytes) {
        let Some(port) = self.radio_output else { return };
        let Some(ip) = self.radio_ip else { return };
        let Some(sender) = self.radio_sender.as_mut() else {
            return;
        };
        if let Err(e) = sender.send(&data, SocketAddr::from((ip, port))).await {
            tracing::warn!("Radio send failed: {e}");
        }
    }

    /// Unicast once the robot is known; otherwise probe the current window
    /// through the pool and rotate it.
    async fn send_to_robot(&mut self, data: Bytes) {
        let Some(port) = self.robot_output else { return };

        if let Some(ip) = self.robot_ip {
            let Some(sender) = self.robot_sender.as_mut() else {
                return;
            };
            if let Err(e) = sender.send(&data, SocketAddr::from((ip, port))).await {
                tracing::warn!("Robot send failed: {e}");
            }
            return;
        }

        for slot in 0..self.pool.len() {
            let Some(addr) = self.book.window_addr(slot) else {
                break;
            };
            if let Some(sender) = self.pool[slot].sender.as_ref() {
                if let Err(e) = sender.send_to(&data, SocketAddr::from((addr, port))).await {
                    tracing::trace!("Probe to {addr} failed: {e}");
                }
            }
        }

        self.refresh_address_list().await;
    }

    // ------------------------------------------------------------------------
    // Scan rotation
    // ------------------------------------------------------------------------

    /// Advance the probe window and rebind the pool receivers under it.
    ///
    /// Runs after every fanned-out robot packet, so scan speed is the
    /// product of the caller's packet cadence and the pool size. Does
    /// nothing once the robot is known.
    async fn refresh_address_list(&mut self) {
        if self.robot_ip.is_some() || self.book.is_empty() {
            return;
        }

        self.book.advance_window();

        let Some(port) = self.robot_input else { return };
        for slot in 0..self.pool.len() {
            // Slots past the end of the list keep their previous binding.
            let Some(addr) = self.book.window_addr(slot) else {
                break;
            };
            self.rebind_pool_receiver(slot, SocketAddr::from((addr, port)))
                .await;
        }
    }

    async fn rebind_pool_receiver(&mut self, slot: usize, addr: SocketAddr) {
        if let Some(reader) = self.pool[slot].reader.take() {
            reader.abort();
        }
        match U::bind(addr).await {
            Ok(socket) => {
                if let Err(e) = socket.set_multicast_loop_v4(false) {
                    tracing::trace!("Could not disable multicast loopback: {e}");
                }
                self.pool[slot].reader = Some(spawn_udp_reader(
                    socket,
                    Source::Robot { slot },
                    self.incoming_tx.clone(),
                ));
            }
            // Skipped this round; the next rotation retries the slot.
            Err(e) => tracing::warn!("Pool receiver {slot} failed to bind {addr}: {e}"),
        }
    }

    /// Tear down and recreate the pool at the current socket count.
    async fn regenerate_socket_pairs(&mut self) {
        for slot in self.pool.drain(..) {
            if let Some(reader) = slot.reader {
                reader.abort();
            }
        }

        if self.robot_kind == SocketKind::Tcp {
            tracing::debug!("Robot channel is TCP; the parallel scan pool stays empty");
            return;
        }

        let count = self.book.socket_count();
        for slot in 0..count {
            let sender = match U::bind(any_addr(0)).await {
                Ok(socket) => Some(socket),
                Err(e) => {
                    tracing::warn!("Pool sender {slot} failed to bind: {e}");
                    None
                }
            };
            // Receivers stay unbound until the first rotation places them.
            self.pool.push(PoolSlot {
                sender,
                reader: None,
            });
        }
        tracing::debug!("Generated {count} parallel socket pairs");
    }

    // ------------------------------------------------------------------------
    // Peers and candidate list
    // ------------------------------------------------------------------------

    async fn set_robot_address(&mut self, address: Option<Ipv4Addr>) {
        if self.robot_ip == address {
            return;
        }
        self.robot_ip = address;
        match address {
            Some(ip) => {
                tracing::info!("Robot address set to {ip}");
                if let (Some(sender), Some(port)) = (self.robot_sender.as_mut(), self.robot_output)
                {
                    sender.connect(SocketAddr::from((ip, port))).await;
                }
            }
            None => tracing::info!("Robot address cleared, resuming scan"),
        }
    }

    async fn set_radio_address(&mut self, address: Option<Ipv4Addr>) {
        self.radio_ip = address;
        tracing::info!("Radio address set to {address:?}");
        self.rebuild_radio_receiver().await;
        if let (Some(ip), Some(sender), Some(port)) =
            (address, self.radio_sender.as_mut(), self.radio_output)
        {
            sender.connect(SocketAddr::from((ip, port))).await;
        }
    }

    async fn set_address_list(&mut self, external: Vec<Ipv4Addr>) {
        self.book.set_external(external, &self.sweep);
        self.regenerate_socket_pairs().await;
    }

    async fn set_custom_socket_count(&mut self, count: usize) {
        if self.book.custom_socket_count() == count {
            return;
        }
        self.book.set_custom_socket_count(count);
        self.regenerate_socket_pairs().await;
        tracing::debug!("Socket count override set to {count}");
    }

    // ------------------------------------------------------------------------
    // Ports
    // ------------------------------------------------------------------------

    async fn set_fms_input_port(&mut self, port: Option<u16>) {
        if self.fms_input == port {
            return;
        }
        self.fms_input = port;
        self.rebuild_fms_receiver().await;
        tracing::debug!("FMS input port set to {port:?}");
    }

    fn set_fms_output_port(&mut self, port: Option<u16>) {
        if self.fms_output == port {
            return;
        }
        self.fms_output = port;
        tracing::debug!("FMS output port set to {port:?}");
    }

    async fn set_radio_input_port(&mut self, port: Option<u16>) {
        if self.radio_input == port {
            return;
        }
        self.radio_input = port;
        self.rebuild_radio_receiver().await;
        tracing::debug!("Radio input port set to {port:?}");
    }

    async fn set_radio_output_port(&mut self, port: Option<u16>) {
        if self.radio_output == port {
            return;
        }
        self.radio_output = port;
        if let (Some(ip), Some(sender), Some(port)) =
            (self.radio_ip, self.radio_sender.as_mut(), port)
        {
            sender.connect(SocketAddr::from((ip, port))).await;
        }
        tracing::debug!("Radio output port set to {port:?}");
    }

    /// Store-only on purpose: rebinding up to 128 receivers on a port edit
    /// would thrash the pool, and the next rotation applies it anyway.
    fn set_robot_input_port(&mut self, port: Option<u16>) {
        if self.robot_input == port {
            return;
        }
        self.robot_input = port;
        tracing::debug!("Robot input port set to {port:?}");
    }

    async fn set_robot_output_port(&mut self, port: Option<u16>) {
        if self.robot_output == port {
            return;
        }
        self.robot_output = port;
        if let (Some(ip), Some(sender), Some(port)) =
            (self.robot_ip, self.robot_sender.as_mut(), port)
        {
            sender.connect(SocketAddr::from((ip, port))).await;
        }
        tracing::debug!("Robot output port set to {port:?}");
    }

    // ------------------------------------------------------------------------
    // Transports
    // ------------------------------------------------------------------------

    async fn set_fms_socket_kind(&mut self, kind: SocketKind) {
        if self.fms_kind == kind {
            return;
        }
        self.fms_kind = kind;
        self.rebuild_fms_channel().await;
        tracing::debug!("FMS socket kind set to {kind:?}");
    }

    async fn set_radio_socket_kind(&mut self, kind: SocketKind) {
        if self.radio_kind == kind {
            return;
        }
        self.radio_kind = kind;
        self.rebuild_radio_channel().await;
        tracing::debug!("Radio socket kind set to {kind:?}");
    }

    /// Replaces only the single robot sender. The pool is rebuilt by the
    /// address-list and socket-count setters, not here.
    async fn set_robot_socket_kind(&mut self, kind: SocketKind) {
        if self.robot_kind == kind {
            return;
        }
        self.robot_kind = kind;
        self.rebuild_robot_sender().await;
        tracing::debug!("Robot socket kind set to {kind:?}");
    }

    // ------------------------------------------------------------------------
    // Channel construction
    // ------------------------------------------------------------------------

    async fn rebuild_fms_channel(&mut self) {
        self.fms_sender = ChannelSender::new(self.fms_kind).await;
        self.rebuild_fms_receiver().await;
    }

    async fn rebuild_radio_channel(&mut self) {
        self.radio_sender = ChannelSender::new(self.radio_kind).await;
        self.rebuild_radio_receiver().await;
    }

    async fn rebuild_robot_sender(&mut self) {
        self.robot_sender = ChannelSender::new(self.robot_kind).await;
        if let (Some(ip), Some(sender), Some(port)) =
            (self.robot_ip, self.robot_sender.as_mut(), self.robot_output)
        {
            sender.connect(SocketAddr::from((ip, port))).await;
        }
    }

    async fn rebuild_fms_receiver(&mut self) {
        if let Some(reader) = self.fms_reader.take() {
            reader.abort();
        }
        let Some(port) = self.fms_input else { return };
        self.fms_reader = self
            .spawn_receiver(self.fms_kind, any_addr(port), Source::Fms)
            .await;
    }

    async fn rebuild_radio_receiver(&mut self) {
        if let Some(reader) = self.radio_reader.take() {
            reader.abort();
        }
        let Some(port) = self.radio_input else { return };
        let addr = match self.radio_ip {
            Some(ip) => SocketAddr::from((ip, port)),
            None => any_addr(port),
        };
        self.radio_reader = self
            .spawn_receiver(self.radio_kind, addr, Source::Radio)
            .await;
    }

    async fn spawn_receiver(
        &self,
        kind: SocketKind,
        addr: SocketAddr,
        source: Source,
    ) -> Option<JoinHandle<()>> {
        match kind {
            SocketKind::Udp => match U::bind(addr).await {
                Ok(socket) => {
                    if let Err(e) = socket.set_multicast_loop_v4(false) {
                        tracing::trace!("Could not disable multicast loopback: {e}");
                    }
                    Some(spawn_udp_reader(socket, source, self.incoming_tx.clone()))
                }
                Err(e) => {
                    tracing::warn!("Receiver failed to bind {addr}: {e}");
                    None
                }
            },
            SocketKind::Tcp => Some(spawn_tcp_reader::<T, L>(
                addr,
                source,
                self.incoming_tx.clone(),
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------------

    fn handle_incoming(&mut self, incoming: Incoming) {
        match incoming.source {
            Source::Fms => self.emit(LinkEvent::FmsPacket(incoming.data)),
            Source::Radio => self.emit(LinkEvent::RadioPacket(incoming.data)),
            Source::Robot { slot } => {
                if incoming.data.is_empty() {
                    return;
                }
                if self.robot_ip.is_none() {
                    if let IpAddr::V4(ip) = incoming.from.ip() {
                        tracing::info!("Robot detected at {ip} (pool slot {slot})");
                        self.robot_ip = Some(ip);
                        self.emit(LinkEvent::RobotDiscovered(ip));
                    }
                }
                self.emit(LinkEvent::RobotPacket(incoming.data));
            }
        }
    }

    /// Best-effort event delivery; a stalled consumer loses packets rather
    /// than stalling the engine.
    fn emit(&self, event: LinkEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!("Event channel full, dropping {event:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

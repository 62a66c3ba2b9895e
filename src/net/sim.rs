//! In-memory socket implementations for deterministic tests.
//!
//! The simulated network is a process-wide switchboard of bound addresses.
//! Unlike a real stack (or a host-granular simulator), any address may be
//! bound by anyone. The scan pool needs exactly that, since it binds
//! receivers to candidate addresses the workstation does not own.
//!
//! Datagrams addressed to a bound `(ip, port)` are delivered to the most
//! recent binder; datagrams to an unbound specific address fall back to a
//! wildcard binding on the same port, mirroring `0.0.0.0` bind semantics.
//! Undeliverable datagrams vanish, like UDP.
//!
//! Tests should carve out their own subnets and ports; the switchboard is
//! shared by every test in a binary.

use super::{TcpListener, TcpStream, UdpSocket};
use dashmap::DashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::OnceLock;
use tokio::sync::{mpsc, Mutex};

struct Datagram {
    data: Vec<u8>,
    from: SocketAddr,
}

type UdpEntry = (u64, mpsc::UnboundedSender<Datagram>);
type TcpEntry = (u64, mpsc::UnboundedSender<(SimTcpStream, SocketAddr)>);

fn udp_registry() -> &'static DashMap<SocketAddr, UdpEntry> {
    static REGISTRY: OnceLock<DashMap<SocketAddr, UdpEntry>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

fn tcp_registry() -> &'static DashMap<SocketAddr, TcpEntry> {
    static REGISTRY: OnceLock<DashMap<SocketAddr, TcpEntry>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

fn next_socket_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

fn resolve_port(port: u16) -> u16 {
    if port != 0 {
        return port;
    }
    // Ephemeral range; collisions across 25k ports are not a test concern.
    static NEXT_PORT: AtomicU16 = AtomicU16::new(40000);
    NEXT_PORT.fetch_add(1, Ordering::Relaxed)
}

fn wildcard(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

// ============================================================================
// UDP
// ============================================================================

/// Simulated datagram socket.
pub struct SimUdpSocket {
    id: u64,
    addr: SocketAddr,
    rx: Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl UdpSocket for SimUdpSocket {
    async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let addr = SocketAddr::new(addr.ip(), resolve_port(addr.port()));
        let id = next_socket_id();
        let (tx, rx) = mpsc::unbounded_channel();
        // Address reuse is always on, matching the flags the engine binds
        // with: a newer bind simply takes over delivery.
        udp_registry().insert(addr, (id, tx));
        Ok(Self {
            id,
            addr,
            rx: Mutex::new(rx),
        })
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let entry = udp_registry()
            .get(&target)
            .or_else(|| udp_registry().get(&wildcard(target.port())));
        if let Some(entry) = entry {
            let _ = entry.1.send(Datagram {
                data: buf.to_vec(),
                from: self.addr,
            });
        }
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(datagram) => {
                let len = datagram.data.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram.data[..len]);
                Ok((len, datagram.from))
            }
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket gone")),
        }
    }

    fn set_multicast_loop_v4(&self, _enabled: bool) -> io::Result<()> {
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for SimUdpSocket {
    fn drop(&mut self) {
        // Only unregister if delivery still points at this socket; a newer
        // bind of the same address must not be torn down by a stale drop.
        udp_registry().remove_if(&self.addr, |_, (id, _)| *id == self.id);
    }
}

// ============================================================================
// TCP
// ============================================================================

/// Simulated TCP stream: two unbounded byte pipes.
pub struct SimTcpStream {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    leftover: Vec<u8>,
}

fn stream_pair(client_addr: SocketAddr, server_addr: SocketAddr) -> (SimTcpStream, SimTcpStream) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    let client = SimTcpStream {
        peer: server_addr,
        tx: client_tx,
        rx: client_rx,
        leftover: Vec::new(),
    };
    let server = SimTcpStream {
        peer: client_addr,
        tx: server_tx,
        rx: server_rx,
        leftover: Vec::new(),
    };
    (client, server)
}

impl TcpStream for SimTcpStream {
    type Listener = SimTcpListener;

    async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let client_addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            resolve_port(0),
        );
        let (client, server) = stream_pair(client_addr, addr);
        let listener = tcp_registry().get(&addr).ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "no listener")
        })?;
        listener
            .1
            .send((server, client_addr))
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener gone"))?;
        Ok(client)
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.leftover.is_empty() {
            match self.rx.recv().await {
                Some(chunk) => self.leftover = chunk,
                None => return Ok(0),
            }
        }
        let len = self.leftover.len().min(buf.len());
        buf[..len].copy_from_slice(&self.leftover[..len]);
        self.leftover.drain(..len);
        Ok(len)
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }
}

/// Simulated TCP listener.
pub struct SimTcpListener {
    id: u64,
    addr: SocketAddr,
    rx: Mutex<mpsc::UnboundedReceiver<(SimTcpStream, SocketAddr)>>,
}

impl TcpListener for SimTcpListener {
    type Stream = SimTcpStream;

    async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let addr = SocketAddr::new(addr.ip(), resolve_port(addr.port()));
        let id = next_socket_id();
        let (tx, rx) = mpsc::unbounded_channel();
        tcp_registry().insert(addr, (id, tx));
        Ok(Self {
            id,
            addr,
            rx: Mutex::new(rx),
        })
    }

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "listener gone"))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for SimTcpListener {
    fn drop(&mut self) {
        tcp_registry().remove_if(&self.addr, |_, (id, _)| *id == self.id);
    }
}

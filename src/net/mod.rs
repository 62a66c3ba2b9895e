//! # Network Abstraction Layer
//!
//! Traits that abstract over async socket I/O, so the engine can run against
//! different implementations.
//!
//! ## Purpose
//!
//! - **Production**: real tokio sockets on the field network
//! - **Testing**: the in-memory [`sim`] network for deterministic tests,
//!   including tests that bind receivers to addresses the host does not own
//!   (which the parallel scan pool does on every rotation)
//!
//! | Trait | Production Impl | Testing Impl |
//! |-------|-----------------|--------------|
//! | [`UdpSocket`] | `tokio::net::UdpSocket` | [`sim::SimUdpSocket`] |
//! | [`TcpStream`] | `tokio::net::TcpStream` | [`sim::SimTcpStream`] |
//! | [`TcpListener`] | `tokio::net::TcpListener` | [`sim::SimTcpListener`] |
//!
//! User code normally never touches these traits; [`SocketLink::spawn`]
//! selects the tokio implementations, [`SocketLink::spawn_with`] accepts any
//! other set.
//!
//! ## Feature Flags
//!
//! - `sim` (default): enables the in-memory implementations for testing
//!
//! [`SocketLink::spawn`]: crate::SocketLink::spawn
//! [`SocketLink::spawn_with`]: crate::SocketLink::spawn_with

use std::future::Future;
use std::io;
use std::net::SocketAddr;

mod tokio_impl;

#[cfg(feature = "sim")]
pub mod sim;

/// Async UDP socket abstraction.
///
/// ## Required Methods
///
/// - `bind`: create a socket bound to an address, with address reuse enabled
///   so several receivers can share a port across rotations
/// - `send_to` / `recv_from`: datagram I/O
/// - `set_multicast_loop_v4`: receivers run with loopback disabled
/// - `local_addr`: the bound address
pub trait UdpSocket: Send + Sync + Sized + 'static {
    /// Bind to the given address with address-reuse semantics.
    fn bind(addr: SocketAddr) -> impl Future<Output = io::Result<Self>> + Send;

    /// Send data to the given address.
    fn send_to(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive data and the source address.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    /// Control whether multicast datagrams sent from this socket are looped
    /// back to the local host.
    fn set_multicast_loop_v4(&self, enabled: bool) -> io::Result<()>;

    /// Get the local address this socket is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Async TCP stream abstraction.
///
/// Only the singleton channel senders ever use TCP; the scan pool is
/// datagram-only.
pub trait TcpStream: Send + Sync + Sized + 'static {
    /// The listener type that produces this stream.
    type Listener: TcpListener<Stream = Self>;

    /// Connect to the given address.
    fn connect(addr: SocketAddr) -> impl Future<Output = io::Result<Self>> + Send;

    /// Read data into the buffer.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Write all data from the buffer.
    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Get the peer address.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

/// Async TCP listener abstraction.
pub trait TcpListener: Send + Sync + Sized + 'static {
    /// The stream type produced when accepting connections.
    type Stream: TcpStream<Listener = Self>;

    /// Bind to the given address.
    fn bind(addr: SocketAddr) -> impl Future<Output = io::Result<Self>> + Send;

    /// Accept a new connection.
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;

    /// Get the local address.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

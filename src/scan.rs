//! # Candidate Address Book
//!
//! The scan engine probes the robot by brute force: a list of candidate
//! addresses is assembled from a caller-supplied list plus a sweep of every
//! LAN the workstation sits on, and a window of it is probed on every
//! outbound robot packet. This is more reliable than hoping the robot
//! respects its default address, that mDNS works, or that a default gateway
//! exists, and the window size caps how much memory the parallel sockets
//! consume.
//!
//! [`AddressBook`] owns the list, the window cursor and the pool sizing
//! policy; it performs no I/O, which keeps the rotation arithmetic easy to
//! test. The [`link`](crate::link) event loop drives it.

use std::net::Ipv4Addr;

/// Hard upper bound on the parallel pool, regardless of overrides.
pub const MAX_SOCKET_COUNT: usize = 128;

/// Upper bound when the pool is auto-sized from the candidate list.
pub const MAX_AUTO_SOCKET_COUNT: usize = 72;

/// Auto-sizing ratio: one socket pair per this many candidate addresses.
const ADDRESSES_PER_SOCKET: usize = 6;

// ============================================================================
// LOCAL NETWORK SWEEP
// ============================================================================

/// Where the LAN sweep obtains the host addresses it expands into `/24`
/// candidate ranges.
#[derive(Debug, Clone, Default)]
pub enum Sweep {
    /// Enumerate the host's up-and-running IPv4 interfaces.
    #[default]
    HostInterfaces,
    /// Expand a fixed set of host addresses. Used by tests and by callers
    /// that already know which interface faces the robot.
    Addresses(Vec<Ipv4Addr>),
    /// No sweep; only the externally supplied list is probed.
    Disabled,
}

impl Sweep {
    fn host_addrs(&self) -> Vec<Ipv4Addr> {
        match self {
            Sweep::HostInterfaces => host_ipv4_addrs(),
            Sweep::Addresses(addrs) => addrs.clone(),
            Sweep::Disabled => Vec::new(),
        }
    }
}

// Interface flag bits, as exposed by default_net on every supported platform.
const IFF_UP: u32 = 0x1;
const IFF_RUNNING: u32 = 0x40;

/// IPv4 addresses of every interface that is up, running and not loopback.
pub fn host_ipv4_addrs() -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    for interface in default_net::get_interfaces() {
        if interface.flags & (IFF_UP | IFF_RUNNING) != (IFF_UP | IFF_RUNNING) {
            continue;
        }
        for net in &interface.ipv4 {
            if net.addr.is_loopback() {
                continue;
            }
            tracing::debug!("Client IP detected: {}", net.addr);
            addrs.push(net.addr);
        }
    }
    addrs
}

/// Expand each host address into its full `/24` neighborhood,
/// `A.B.C.1 ..= A.B.C.254`.
pub fn lan_sweep(host_addrs: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    let mut out = Vec::with_capacity(host_addrs.len() * 254);
    for addr in host_addrs {
        let [a, b, c, _] = addr.octets();
        for host in 1..255 {
            out.push(Ipv4Addr::new(a, b, c, host));
        }
    }
    out
}

// ============================================================================
// ADDRESS BOOK
// ============================================================================

/// Candidate robot addresses plus the probe window over them.
///
/// The list is the concatenation of the external list and the generated
/// sweep (loopback last). Duplicates are kept as supplied; the probing is
/// harmless either way.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    addresses: Vec<Ipv4Addr>,
    cursor: usize,
    custom_socket_count: usize,
}

impl AddressBook {
    /// Replace the external portion of the list and regenerate the sweep.
    /// Resets the probe window.
    pub fn set_external(&mut self, external: Vec<Ipv4Addr>, sweep: &Sweep) {
        self.addresses = external;
        self.addresses.extend(lan_sweep(&sweep.host_addrs()));
        self.addresses.push(Ipv4Addr::LOCALHOST);
        self.cursor = 0;
        tracing::debug!("Candidate list rebuilt with {} entries", self.addresses.len());
    }

    /// Override the pool size; 0 restores auto-sizing.
    pub fn set_custom_socket_count(&mut self, count: usize) {
        self.custom_socket_count = count;
    }

    pub fn custom_socket_count(&self) -> usize {
        self.custom_socket_count
    }

    /// Number of parallel socket pairs to operate.
    ///
    /// A custom count wins (capped at [`MAX_SOCKET_COUNT`]); otherwise one
    /// pair per six candidates, at least one and at most
    /// [`MAX_AUTO_SOCKET_COUNT`].
    pub fn socket_count(&self) -> usize {
        let count = if self.custom_socket_count > 0 {
            self.custom_socket_count
        } else {
            (self.addresses.len() / ADDRESSES_PER_SOCKET)
                .max(1)
                .min(MAX_AUTO_SOCKET_COUNT)
        };
        count.min(MAX_SOCKET_COUNT)
    }

    /// Advance the probe window by one pool width, wrapping to the start
    /// once the remainder of the list is narrower than the pool.
    pub fn advance_window(&mut self) {
        if self.addresses.len() > self.cursor + self.socket_count() {
            self.cursor += self.socket_count();
        } else {
            self.cursor = 0;
        }
    }

    /// Candidate for pool slot `slot` in the current window, if the window
    /// extends that far.
    pub fn window_addr(&self, slot: usize) -> Option<Ipv4Addr> {
        self.addresses.get(self.cursor + slot).copied()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

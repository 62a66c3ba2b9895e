//! # Engine Configuration
//!
//! Configuration for the socket engine ([`SocketLink`](crate::SocketLink)).
//!
//! The defaults mirror a freshly constructed engine: every port disabled,
//! every channel UDP, pool size auto-selected from the candidate list. A
//! protocol layer (see [`proto2015`](crate::proto2015)) supplies the actual
//! port plan.
//!
//! ```
//! use dslink::{LinkConfig, SocketKind};
//!
//! let config = LinkConfig::builder()
//!     .robot_input_port(1150)
//!     .robot_output_port(1110)
//!     .custom_socket_count(8)
//!     .build();
//! assert_eq!(config.robot_socket_kind, SocketKind::Udp);
//! ```

use crate::scan::Sweep;
use crate::SocketKind;

/// Capacity of the engine's event and command channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// Socket engine configuration.
///
/// Ports are `Option<u16>`; `None` disables the endpoint entirely. All
/// fields can be changed at runtime through the [`SocketLink`] setters,
/// this struct only selects the starting state.
///
/// [`SocketLink`]: crate::SocketLink
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Port on which FMS packets are received (default: disabled)
    pub fms_input_port: Option<u16>,
    /// Port to which FMS packets are sent (default: disabled)
    pub fms_output_port: Option<u16>,
    /// Port on which radio packets are received (default: disabled)
    pub radio_input_port: Option<u16>,
    /// Port to which radio packets are sent (default: disabled)
    pub radio_output_port: Option<u16>,
    /// Port on which robot packets are received; every pool receiver binds
    /// to this port (default: disabled)
    pub robot_input_port: Option<u16>,
    /// Port to which robot packets are sent (default: disabled)
    pub robot_output_port: Option<u16>,
    /// Transport for the FMS channel (default: UDP)
    pub fms_socket_kind: SocketKind,
    /// Transport for the radio channel (default: UDP)
    pub radio_socket_kind: SocketKind,
    /// Transport for the robot single sender (default: UDP)
    pub robot_socket_kind: SocketKind,
    /// Override for the parallel pool size; 0 auto-sizes from the candidate
    /// list (default: 0)
    pub custom_socket_count: usize,
    /// Where the LAN sweep obtains the host addresses it expands
    /// (default: the host's network interfaces)
    pub sweep: Sweep,
    /// Bound of the event and command channels (default: 128)
    pub channel_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            fms_input_port: None,
            fms_output_port: None,
            radio_input_port: None,
            radio_output_port: None,
            robot_input_port: None,
            robot_output_port: None,
            fms_socket_kind: SocketKind::Udp,
            radio_socket_kind: SocketKind::Udp,
            robot_socket_kind: SocketKind::Udp,
            custom_socket_count: 0,
            sweep: Sweep::HostInterfaces,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl LinkConfig {
    /// Create a new builder
    pub fn builder() -> LinkConfigBuilder {
        LinkConfigBuilder::default()
    }
}

/// Builder for [`LinkConfig`]
#[derive(Default)]
pub struct LinkConfigBuilder {
    config: LinkConfig,
}

impl LinkConfigBuilder {
    pub fn fms_input_port(mut self, port: u16) -> Self {
        self.config.fms_input_port = Some(port);
        self
    }

    pub fn fms_output_port(mut self, port: u16) -> Self {
        self.config.fms_output_port = Some(port);
        self
    }

    pub fn radio_input_port(mut self, port: u16) -> Self {
        self.config.radio_input_port = Some(port);
        self
    }

    pub fn radio_output_port(mut self, port: u16) -> Self {
        self.config.radio_output_port = Some(port);
        self
    }

    pub fn robot_input_port(mut self, port: u16) -> Self {
        self.config.robot_input_port = Some(port);
        self
    }

    pub fn robot_output_port(mut self, port: u16) -> Self {
        self.config.robot_output_port = Some(port);
        self
    }

    pub fn fms_socket_kind(mut self, kind: SocketKind) -> Self {
        self.config.fms_socket_kind = kind;
        self
    }

    pub fn radio_socket_kind(mut self, kind: SocketKind) -> Self {
        self.config.radio_socket_kind = kind;
        self
    }

    pub fn robot_socket_kind(mut self, kind: SocketKind) -> Self {
        self.config.robot_socket_kind = kind;
        self
    }

    /// Override the parallel pool size; 0 restores auto-sizing.
    pub fn custom_socket_count(mut self, count: usize) -> Self {
        self.config.custom_socket_count = count;
        self
    }

    /// Select the LAN sweep source.
    pub fn sweep(mut self, sweep: Sweep) -> Self {
        self.config.sweep = sweep;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Build the configuration
    pub fn build(self) -> LinkConfig {
        self.config
    }
}

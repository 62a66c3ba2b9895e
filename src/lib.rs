//! # dslink
//!
//! A driver-station communications runtime for competition robots.
//!
//! The crate mediates three datagram relationships from an operator
//! workstation: the robot controller (address unknown until discovered),
//! the robot radio, and the Field Management System (FMS). Discovery does
//! not rely on mDNS or DHCP; instead a rotating pool of parallel sockets
//! probes every plausible LAN address until the robot answers, then locks
//! onto the responder.
//!
//! ## Layers
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`link`] | Socket engine: channel multiplexing, parallel LAN scan, peer acquisition |
//! | [`scan`] | Candidate address book, probe window rotation, local network sweep |
//! | [`proto2015`] | 2015-era control protocol: packet codec, telemetry decode, version files |
//! | [`driver`] | Ties the link and the protocol together behind one handle |
//! | [`net`] | Socket traits with tokio and simulated implementations |
//! | [`fetch`] | Capability trait for the out-of-band version-file retrieval |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dslink::{ControlMode, DriverStation, DsConfig, DsEvent};
//!
//! # async fn example(fetcher: Arc<dyn dslink::Fetcher>) -> dslink::Result<()> {
//! let (ds, mut events) = DriverStation::spawn(DsConfig::new(3794), fetcher);
//!
//! ds.set_control_mode(ControlMode::TeleOperated).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         DsEvent::Voltage(v) => println!("battery: {v:.2} V"),
//!         DsEvent::RobotDiscovered(ip) => println!("robot at {ip}"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! All engine state lives on one event-loop task; the handles are thin
//! command-channel fronts, so they can be used from any task without extra
//! locking.

pub mod config;
pub mod driver;
pub mod error;
pub mod fetch;
pub mod link;
pub mod net;
pub mod proto2015;
pub mod scan;

pub use config::LinkConfig;
pub use driver::{DriverStation, DsConfig, DsEvent};
pub use error::{Error, Result};
pub use fetch::Fetcher;
pub use link::{LinkEvent, SocketLink};
pub use proto2015::{Protocol2015, ProtocolEvent};

// ============================================================================
// CONTROL VOCABULARY
// ============================================================================

/// Operating mode requested of the robot controller.
///
/// Carried in every outbound client packet and echoed back by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Outputs disabled, code still running.
    #[default]
    Disabled,
    /// Operator control; joystick data is appended to every packet.
    TeleOperated,
    /// Autonomous routine.
    Autonomous,
    /// Test mode.
    Test,
    /// Emergency stop; requires a robot reboot to clear.
    EmergencyStop,
}

/// Match-side assignment of the team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alliance {
    #[default]
    Red1,
    Red2,
    Red3,
    Blue1,
    Blue2,
    Blue3,
}

/// Transport used by one of the three peer channels.
///
/// The parallel scan pool is datagram-only; selecting [`SocketKind::Tcp`]
/// for the robot channel affects the single sender used once the robot
/// address is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketKind {
    #[default]
    Udp,
    Tcp,
}

/// Out-of-band request carried in the status byte of the client packet.
///
/// Set by [`Protocol2015::reboot`] and [`Protocol2015::restart_code`]; it is
/// repeated on every packet until the caller resets it. There is no
/// automatic revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RobotStatus {
    #[default]
    Normal,
    RebootRobot,
    RestartCode,
}

// ============================================================================
// JOYSTICK SNAPSHOT
// ============================================================================

/// An instantaneous reading of one attached joystick.
///
/// Axes are nominally in −1.0…+1.0, POV hats are −1 (released) or a heading
/// in 0…359. Capture from the host OS is outside this crate; callers push
/// snapshots through [`DriverStation::set_joysticks`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Joystick {
    pub axes: Vec<f32>,
    pub buttons: Vec<bool>,
    pub pov_hats: Vec<i16>,
}

impl Joystick {
    pub fn num_axes(&self) -> usize {
        self.axes.len()
    }

    pub fn num_buttons(&self) -> usize {
        self.buttons.len()
    }

    pub fn num_pov_hats(&self) -> usize {
        self.pov_hats.len()
    }
}

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub mod prelude {
    pub use crate::{
        Alliance, ControlMode, DriverStation, DsConfig, DsEvent, Error, Fetcher, Joystick,
        LinkConfig, LinkEvent, Protocol2015, ProtocolEvent, Result, RobotStatus, SocketKind,
        SocketLink,
    };
}

//! # 2015-era Control Protocol
//!
//! Stateful side of the protocol: the ping counter stamped on every client
//! packet, the pending reboot/restart request, edge detection on decoded
//! telemetry, and the one-shot retrieval of the robot's firmware version
//! files once the first status packet proves a robot is talking.
//!
//! The byte layout lives in [`wire`]; this module never touches sockets.
//! The [`driver`](crate::driver) feeds it inbound bytes and ships whatever
//! [`Protocol2015::generate_client_packet`] returns.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Alliance, ControlMode, Joystick, RobotStatus};

pub mod wire;

/// Version file containing the installed library version.
pub const LIB_VERSION_FILE: &str = "/tmp/frc_versions/FRC_Lib_Version.ini";
/// Version file for the pneumatics control module.
pub const PCM_VERSION_FILE: &str = "/tmp/frc_versions/PCM-0-versions.ini";
/// Version file for the power distribution panel.
pub const PDP_VERSION_FILE: &str = "/tmp/frc_versions/PDP-0-versions.ini";

const VERSION_KEY: &str = "currentVersion";

// ============================================================================
// EVENTS
// ============================================================================

/// Telemetry decoded from the robot, plus version-file results.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// Battery voltage; reported on every status packet.
    Voltage(f32),
    /// User code appeared or vanished (edge-triggered).
    CodePresent(bool),
    /// The robot echoed a control mode different from the one last sent
    /// (edge-triggered).
    ControlModeEcho(ControlMode),
    PcmVersion(String),
    PdpVersion(String),
    LibVersion(String),
}

/// Outcome of decoding one inbound packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundUpdate {
    pub events: Vec<ProtocolEvent>,
    /// Set on the first valid packet after construction or [`Protocol2015::reset`];
    /// the caller should retrieve the version files.
    pub newly_connected: bool,
}

// ============================================================================
// PROTOCOL STATE
// ============================================================================

/// 2015 protocol state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Protocol2015 {
    team: u16,
    ping_index: u16,
    just_connected: bool,
    status: RobotStatus,
    control_mode: ControlMode,
    alliance: Alliance,
    robot_address: Option<String>,
    radio_address: Option<String>,
    robot_code: bool,
    joysticks: Vec<Joystick>,
}

impl Protocol2015 {
    pub fn new(team: u16) -> Self {
        Self {
            team,
            ping_index: 0,
            just_connected: false,
            status: RobotStatus::Normal,
            control_mode: ControlMode::Disabled,
            alliance: Alliance::Red1,
            robot_address: None,
            radio_address: None,
            robot_code: false,
            joysticks: Vec::new(),
        }
    }

    /// Return to the as-constructed protocol state: ping counter zeroed,
    /// connection latch cleared, no pending request, robot disabled.
    pub fn reset(&mut self) {
        self.ping_index = 0;
        self.just_connected = false;
        self.status = RobotStatus::Normal;
        self.control_mode = ControlMode::Disabled;
    }

    /// Ask the controller to reboot. Carried on every following packet
    /// until [`reset`](Self::reset) (or a new request) replaces it.
    pub fn reboot(&mut self) {
        self.status = RobotStatus::RebootRobot;
    }

    /// Ask the controller to restart user code. Same cadence as
    /// [`reboot`](Self::reboot).
    pub fn restart_code(&mut self) {
        self.status = RobotStatus::RestartCode;
    }

    pub fn set_team(&mut self, team: u16) {
        self.team = team;
    }

    pub fn team(&self) -> u16 {
        self.team
    }

    pub fn set_control_mode(&mut self, mode: ControlMode) {
        self.control_mode = mode;
    }

    pub fn control_mode(&self) -> ControlMode {
        self.control_mode
    }

    pub fn set_alliance(&mut self, alliance: Alliance) {
        self.alliance = alliance;
    }

    pub fn alliance(&self) -> Alliance {
        self.alliance
    }

    pub fn set_joysticks(&mut self, joysticks: Vec<Joystick>) {
        self.joysticks = joysticks;
    }

    /// Override the robot address used for version-file URLs; `None`
    /// returns to the team-derived default.
    pub fn set_robot_address(&mut self, address: Option<String>) {
        self.robot_address = address;
    }

    pub fn set_radio_address(&mut self, address: Option<String>) {
        self.radio_address = address;
    }

    // ------------------------------------------------------------------------
    // Derived addresses
    // ------------------------------------------------------------------------

    /// The robot hostname: the override if set, else `roboRIO-<team>.local`.
    pub fn robot_address(&self) -> String {
        match &self.robot_address {
            Some(address) => address.clone(),
            None => format!("roboRIO-{}.local", self.team),
        }
    }

    /// The radio address: the override if set, else the static team IP
    /// `10.TE.AM.1`.
    pub fn radio_address(&self) -> String {
        match &self.radio_address {
            Some(address) => address.clone(),
            None => static_team_ip(self.team, 1).to_string(),
        }
    }

    /// URLs of the three firmware version files on the robot.
    pub fn version_file_urls(&self) -> [String; 3] {
        let host = format!("ftp://{}", self.robot_address());
        [
            format!("{host}{LIB_VERSION_FILE}"),
            format!("{host}{PCM_VERSION_FILE}"),
            format!("{host}{PDP_VERSION_FILE}"),
        ]
    }

    // ------------------------------------------------------------------------
    // Packet I/O
    // ------------------------------------------------------------------------

    /// Assemble the next client packet.
    ///
    /// Increments the ping counter first, so consecutive packets carry
    /// consecutive indices (mod 0x10000). Joystick data rides along only in
    /// TeleOperated.
    pub fn generate_client_packet(&mut self) -> Bytes {
        self.ping_index = self.ping_index.wrapping_add(1);

        let mut buf = BytesMut::with_capacity(
            6 + self
                .joysticks
                .iter()
                .map(wire::joystick_block_len)
                .sum::<usize>(),
        );
        buf.put_u16(self.ping_index);
        buf.put_u8(wire::GENERAL_HEADER);
        buf.put_u8(wire::control_code(self.control_mode));
        buf.put_u8(wire::status_code(self.status));
        buf.put_u8(wire::alliance_code(self.alliance));

        if self.control_mode == ControlMode::TeleOperated {
            wire::encode_joysticks(&self.joysticks, &mut buf);
        }

        buf.freeze()
    }

    /// Decode one inbound robot packet and fold it into the state.
    ///
    /// Short packets produce an empty update. Voltage is reported on every
    /// packet; code presence and the control-mode echo only on change. The
    /// locally cached control mode is what the caller last requested, the
    /// echo never overwrites it.
    pub fn read_robot_data(&mut self, data: &[u8]) -> InboundUpdate {
        let mut update = InboundUpdate::default();
        let Some(frame) = wire::decode_status_packet(data) else {
            return update;
        };

        update.events.push(ProtocolEvent::Voltage(frame.voltage));

        if self.robot_code != frame.code_present {
            self.robot_code = frame.code_present;
            update
                .events
                .push(ProtocolEvent::CodePresent(frame.code_present));
        }

        if let Some(mode) = frame.control_echo {
            if mode != self.control_mode {
                update.events.push(ProtocolEvent::ControlModeEcho(mode));
            }
        }

        if !self.just_connected {
            self.just_connected = true;
            update.newly_connected = true;
        }

        update
    }
}

/// The static `10.TE.AM.x` address derived from a team number.
pub fn static_team_ip(team: u16, host: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, (team / 100) as u8, (team % 100) as u8, host)
}

/// Map a completed version-file download to its event.
///
/// Unrecognized URLs and empty bodies are ignored, as are PCM/PDP files
/// without a parseable version; the last known version stays in force.
pub fn handle_version_file(url: &str, body: &[u8]) -> Option<ProtocolEvent> {
    if url.is_empty() || body.is_empty() {
        return None;
    }

    let text = String::from_utf8_lossy(body);
    let url = url.to_ascii_lowercase();

    if url.contains(&PCM_VERSION_FILE.to_ascii_lowercase()) {
        parse_current_version(&text).map(ProtocolEvent::PcmVersion)
    } else if url.contains(&PDP_VERSION_FILE.to_ascii_lowercase()) {
        parse_current_version(&text).map(ProtocolEvent::PdpVersion)
    } else if url.contains(&LIB_VERSION_FILE.to_ascii_lowercase()) {
        Some(ProtocolEvent::LibVersion(text.into_owned()))
    } else {
        None
    }
}

/// The four characters following `currentVersion=` in an ini body.
fn parse_current_version(body: &str) -> Option<String> {
    let at = body.find(VERSION_KEY)?;
    let start = at + VERSION_KEY.len() + 1;
    body.get(start..start + 4).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_packet(echo: u8, program: u8, major: u8, minor: u8) -> [u8; 8] {
        [0, 1, wire::GENERAL_HEADER, echo, program, major, minor, 0]
    }

    #[test_log::test]
    fn first_packet_is_six_bytes_with_index_one() {
        let mut proto = Protocol2015::new(3794);
        let packet = proto.generate_client_packet();
        assert_eq!(
            &packet[..],
            [0x00, 0x01, wire::GENERAL_HEADER, 0x00, 0x00, 0x00]
        );
    }

    #[test_log::test]
    fn ping_index_is_monotone_and_wraps_without_skipping() {
        let mut proto = Protocol2015::new(3794);
        assert_eq!(&proto.generate_client_packet()[..2], [0x00, 0x01]);
        assert_eq!(&proto.generate_client_packet()[..2], [0x00, 0x02]);

        proto.ping_index = 0xFFFE;
        assert_eq!(&proto.generate_client_packet()[..2], [0xFF, 0xFF]);
        assert_eq!(&proto.generate_client_packet()[..2], [0x00, 0x00]);
        assert_eq!(&proto.generate_client_packet()[..2], [0x00, 0x01]);
    }

    #[test_log::test]
    fn teleop_packets_carry_joystick_blocks() {
        let mut proto = Protocol2015::new(3794);
        proto.set_joysticks(vec![Joystick {
            axes: vec![1.0],
            buttons: vec![true, false, true],
            pov_hats: vec![],
        }]);

        let packet = proto.generate_client_packet();
        assert_eq!(packet.len(), 6, "disabled packets have no joystick data");

        proto.set_control_mode(ControlMode::TeleOperated);
        let packet = proto.generate_client_packet();
        assert_eq!(packet.len(), 6 + 7);
        assert_eq!(packet[3], wire::control_code(ControlMode::TeleOperated));
        assert_eq!(
            &packet[6..],
            [7, wire::JOYSTICK_HEADER, 1, 0x7F, 3, 0b0000_0101, 0]
        );
    }

    #[test_log::test]
    fn pending_request_rides_until_reset() {
        let mut proto = Protocol2015::new(3794);
        proto.reboot();
        assert_eq!(proto.generate_client_packet()[4], 0x18);
        assert_eq!(proto.generate_client_packet()[4], 0x18);

        proto.restart_code();
        assert_eq!(proto.generate_client_packet()[4], 0x14);

        proto.reset();
        assert_eq!(proto.generate_client_packet()[4], 0x00);
    }

    #[test_log::test]
    fn reset_is_idempotent() {
        let mut proto = Protocol2015::new(254);
        proto.set_control_mode(ControlMode::Autonomous);
        proto.reboot();
        proto.generate_client_packet();
        proto.read_robot_data(&status_packet(0x06, 1, 12, 0));

        proto.reset();
        let once = proto.clone();
        proto.reset();
        assert_eq!(proto, once);
    }

    #[test_log::test]
    fn team_number_derives_both_addresses() {
        let proto = Protocol2015::new(3794);
        assert_eq!(proto.robot_address(), "roboRIO-3794.local");
        assert_eq!(proto.radio_address(), "10.37.94.1");

        let proto = Protocol2015::new(254);
        assert_eq!(proto.radio_address(), "10.2.54.1");
    }

    #[test_log::test]
    fn address_overrides_win_over_derivation() {
        let mut proto = Protocol2015::new(3794);
        proto.set_robot_address(Some("10.37.94.20".into()));
        proto.set_radio_address(Some("10.37.94.4".into()));
        assert_eq!(proto.robot_address(), "10.37.94.20");
        assert_eq!(proto.radio_address(), "10.37.94.4");

        proto.set_robot_address(None);
        assert_eq!(proto.robot_address(), "roboRIO-3794.local");
    }

    #[test_log::test]
    fn version_urls_point_at_the_robot() {
        let mut proto = Protocol2015::new(3794);
        proto.set_robot_address(Some("10.37.94.20".into()));
        let [lib, pcm, pdp] = proto.version_file_urls();
        assert_eq!(lib, "ftp://10.37.94.20/tmp/frc_versions/FRC_Lib_Version.ini");
        assert_eq!(pcm, "ftp://10.37.94.20/tmp/frc_versions/PCM-0-versions.ini");
        assert_eq!(pdp, "ftp://10.37.94.20/tmp/frc_versions/PDP-0-versions.ini");
    }

    #[test_log::test]
    fn voltage_is_reported_on_every_packet() {
        let mut proto = Protocol2015::new(3794);
        let update = proto.read_robot_data(&status_packet(0x00, 1, 12, 34));
        assert!(update
            .events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::Voltage(v) if (v - 12.34).abs() < 0.005)));

        let update = proto.read_robot_data(&status_packet(0x00, 1, 12, 34));
        assert!(matches!(update.events[0], ProtocolEvent::Voltage(_)));
    }

    #[test_log::test]
    fn code_presence_is_edge_triggered() {
        let mut proto = Protocol2015::new(3794);
        let update = proto.read_robot_data(&status_packet(0x00, 1, 12, 0));
        assert!(update
            .events
            .contains(&ProtocolEvent::CodePresent(true)));

        let update = proto.read_robot_data(&status_packet(0x00, 1, 12, 0));
        assert!(!update
            .events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::CodePresent(_))));

        let update = proto.read_robot_data(&status_packet(0x00, wire::NO_PROGRAM, 12, 0));
        assert!(update
            .events
            .contains(&ProtocolEvent::CodePresent(false)));
    }

    #[test_log::test]
    fn control_echo_fires_only_on_mismatch() {
        let mut proto = Protocol2015::new(3794);
        proto.set_control_mode(ControlMode::Autonomous);

        let update = proto.read_robot_data(&status_packet(0x06, 1, 12, 0));
        assert!(!update
            .events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::ControlModeEcho(_))));

        let update = proto.read_robot_data(&status_packet(0x00, 1, 12, 0));
        assert!(update
            .events
            .contains(&ProtocolEvent::ControlModeEcho(ControlMode::Disabled)));

        // The echo never overwrites what the caller requested
        assert_eq!(proto.control_mode(), ControlMode::Autonomous);

        // An unknown echo byte is dropped
        let update = proto.read_robot_data(&status_packet(0x7E, 1, 12, 0));
        assert!(!update
            .events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::ControlModeEcho(_))));
    }

    #[test_log::test]
    fn short_packets_are_dropped_silently() {
        let mut proto = Protocol2015::new(3794);
        let update = proto.read_robot_data(&[0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(update, InboundUpdate::default());
        assert!(!proto.just_connected);
    }

    #[test_log::test]
    fn connection_latch_fires_once_until_reset() {
        let mut proto = Protocol2015::new(3794);
        assert!(proto.read_robot_data(&status_packet(0, 1, 12, 0)).newly_connected);
        assert!(!proto.read_robot_data(&status_packet(0, 1, 12, 0)).newly_connected);

        proto.reset();
        assert!(proto.read_robot_data(&status_packet(0, 1, 12, 0)).newly_connected);
    }

    #[test_log::test]
    fn version_files_parse_the_current_version_key() {
        let pcm = "[pcm]\ncurrentVersion=1.40\nhardwareRev=3";
        let event = handle_version_file(
            "ftp://roborio-3794.local/tmp/frc_versions/PCM-0-versions.ini",
            pcm.as_bytes(),
        );
        assert_eq!(event, Some(ProtocolEvent::PcmVersion("1.40".into())));

        let event = handle_version_file(
            "ftp://roborio-3794.local/tmp/frc_versions/PDP-0-versions.ini",
            "currentVersion=2.01".as_bytes(),
        );
        assert_eq!(event, Some(ProtocolEvent::PdpVersion("2.01".into())));

        let event = handle_version_file(
            "ftp://roborio-3794.local/tmp/frc_versions/FRC_Lib_Version.ini",
            b"2015 Java 1.0.0",
        );
        assert_eq!(
            event,
            Some(ProtocolEvent::LibVersion("2015 Java 1.0.0".into()))
        );
    }

    #[test_log::test]
    fn unusable_version_files_are_ignored() {
        assert_eq!(handle_version_file("", b"currentVersion=1.40"), None);
        assert_eq!(
            handle_version_file("ftp://x/tmp/frc_versions/PCM-0-versions.ini", b""),
            None
        );
        // Key present but body too short for four version characters
        assert_eq!(
            handle_version_file(
                "ftp://x/tmp/frc_versions/PCM-0-versions.ini",
                b"currentVersion=1"
            ),
            None
        );
        assert_eq!(handle_version_file("ftp://x/unrelated.ini", b"data"), None);
    }
}

//! # 2015 Control Protocol Wire Format
//!
//! Byte-level encoding of the client→robot control packet and decoding of
//! the robot→client status packet. Every offset and code here is fixed by
//! robots deployed in that era; changing any of them breaks the link.
//!
//! ## Client packet
//!
//! ```text
//! Offset  Size  Field
//! ─────────────────────────────────────────────
//!   0      2    Ping index (big-endian)
//!   2      1    Section tag (0x01, general)
//!   3      1    Control code
//!   4      1    Status code
//!   5      1    Alliance code
//!   6      …    Joystick block (TeleOperated only)
//! ─────────────────────────────────────────────
//! ```
//!
//! ## Joystick block, per stick
//!
//! ```text
//!   u8  size          5 + axes + ceil(buttons/8) + 2*hats, counts itself
//!   u8  section tag   (0x0c, joystick)
//!   u8  axis count
//!   i8  axes…         axis * (0xFF/2), truncated
//!   u8  button count
//!   u8  buttons…      LSB-first packed bits
//!   u8  hat count
//!   u16 hats…         low byte of the reading, then a zero fill
//! ```
//!
//! ## Status packet (robot → client)
//!
//! At least 8 bytes. Byte 3 echoes the control code, byte 4 carries the
//! program status, bytes 5/6 carry whole volts and centivolts.

use bytes::{Buf, BufMut};

use crate::{Alliance, ControlMode, Joystick, RobotStatus};

// ============================================================================
// PORT PLAN
// ============================================================================

/// Port the robot sends status packets to (bound by every pool receiver).
pub const ROBOT_INPUT_PORT: u16 = 1150;
/// Port the robot listens for control packets on.
pub const ROBOT_OUTPUT_PORT: u16 = 1110;
/// Port the FMS sends packets to the workstation on.
pub const FMS_INPUT_PORT: u16 = 1120;
/// Port the workstation sends packets to the FMS on.
pub const FMS_OUTPUT_PORT: u16 = 1160;
/// Port the radio reports on.
pub const RADIO_INPUT_PORT: u16 = 1140;

// ============================================================================
// SECTION TAGS AND CODES
// ============================================================================

/// Section tag opening every client packet.
pub const GENERAL_HEADER: u8 = 0x01;
/// Section tag opening each joystick block.
pub const JOYSTICK_HEADER: u8 = 0x0c;

/// Program status reported by a robot without user code.
pub const NO_PROGRAM: u8 = 0x00;

/// Minimum length of a decodable status packet.
pub const STATUS_PACKET_MIN_LEN: usize = 8;

/// Fixed offsets into the status packet.
pub const CONTROL_ECHO_OFFSET: usize = 3;
pub const ROBOT_STATUS_OFFSET: usize = 4;
pub const VOLTAGE_MAJOR_OFFSET: usize = 5;
pub const VOLTAGE_MINOR_OFFSET: usize = 6;

/// Control code for the requested operating mode.
pub fn control_code(mode: ControlMode) -> u8 {
    match mode {
        ControlMode::Disabled => 0x00,
        ControlMode::TeleOperated => 0x04,
        ControlMode::Test => 0x05,
        ControlMode::Autonomous => 0x06,
        ControlMode::EmergencyStop => 0x80,
    }
}

/// Inverse of [`control_code`]; unknown bytes decode to `None`.
pub fn control_mode_from_code(code: u8) -> Option<ControlMode> {
    match code {
        0x00 => Some(ControlMode::Disabled),
        0x04 => Some(ControlMode::TeleOperated),
        0x05 => Some(ControlMode::Test),
        0x06 => Some(ControlMode::Autonomous),
        0x80 => Some(ControlMode::EmergencyStop),
        _ => None,
    }
}

/// Status code for the pending out-of-band request.
pub fn status_code(status: RobotStatus) -> u8 {
    match status {
        RobotStatus::Normal => 0x00,
        RobotStatus::RestartCode => 0x14,
        RobotStatus::RebootRobot => 0x18,
    }
}

/// Alliance station code.
pub fn alliance_code(alliance: Alliance) -> u8 {
    match alliance {
        Alliance::Red1 => 0x00,
        Alliance::Red2 => 0x01,
        Alliance::Red3 => 0x02,
        Alliance::Blue1 => 0x03,
        Alliance::Blue2 => 0x04,
        Alliance::Blue3 => 0x05,
    }
}

// ============================================================================
// JOYSTICK BLOCK
// ============================================================================

/// On-wire size of one joystick block, including the size byte itself.
pub fn joystick_block_len(joystick: &Joystick) -> usize {
    5 + joystick.num_axes() + joystick.num_buttons().div_ceil(8) + 2 * joystick.num_pov_hats()
}

/// Append one joystick block to the buffer.
pub fn encode_joystick(joystick: &Joystick, buf: &mut impl BufMut) {
    buf.put_u8(joystick_block_len(joystick) as u8);
    buf.put_u8(JOYSTICK_HEADER);

    buf.put_u8(joystick.num_axes() as u8);
    for &axis in &joystick.axes {
        buf.put_i8((axis * (0xff as f32 / 2.0)) as i8);
    }

    buf.put_u8(joystick.num_buttons() as u8);
    let mut packed = vec![0u8; joystick.num_buttons().div_ceil(8)];
    for (i, &pressed) in joystick.buttons.iter().enumerate() {
        if pressed {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    buf.put_slice(&packed);

    buf.put_u8(joystick.num_pov_hats() as u8);
    for &hat in &joystick.pov_hats {
        // Two bytes per hat on the wire; the legacy encoder only ever
        // produced a meaningful low byte, the second is zero-filled.
        buf.put_u8(hat as u8);
        buf.put_u8(0);
    }
}

/// Append the blocks for every attached joystick, in order.
pub fn encode_joysticks(joysticks: &[Joystick], buf: &mut impl BufMut) {
    for joystick in joysticks {
        encode_joystick(joystick, buf);
    }
}

/// A decoded joystick block, as raw wire values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoystickBlock {
    pub axes: Vec<i8>,
    pub buttons: Vec<bool>,
    pub pov_hats: Vec<u16>,
}

/// Decode one joystick block. Returns `None` on truncation or a missing
/// section tag.
pub fn decode_joystick(buf: &mut impl Buf) -> Option<JoystickBlock> {
    if buf.remaining() < 3 {
        return None;
    }
    let _size = buf.get_u8();
    if buf.get_u8() != JOYSTICK_HEADER {
        return None;
    }

    let num_axes = buf.get_u8() as usize;
    if buf.remaining() < num_axes + 1 {
        return None;
    }
    let mut axes = Vec::with_capacity(num_axes);
    for _ in 0..num_axes {
        axes.push(buf.get_i8());
    }

    let num_buttons = buf.get_u8() as usize;
    let packed_len = num_buttons.div_ceil(8);
    if buf.remaining() < packed_len + 1 {
        return None;
    }
    let mut packed = Vec::with_capacity(packed_len);
    for _ in 0..packed_len {
        packed.push(buf.get_u8());
    }
    let buttons: Vec<bool> = (0..num_buttons)
        .map(|i| packed[i / 8] & (1 << (i % 8)) != 0)
        .collect();

    let num_hats = buf.get_u8() as usize;
    if buf.remaining() < 2 * num_hats {
        return None;
    }
    let mut pov_hats = Vec::with_capacity(num_hats);
    for _ in 0..num_hats {
        pov_hats.push(buf.get_u16());
    }

    Some(JoystickBlock {
        axes,
        buttons,
        pov_hats,
    })
}

// ============================================================================
// STATUS PACKET
// ============================================================================

/// Decoded robot status packet.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusFrame {
    /// Battery voltage, whole volts plus centivolts.
    pub voltage: f32,
    /// Whether user code is running.
    pub code_present: bool,
    /// Echoed control mode; `None` when the echo byte is not a known code.
    pub control_echo: Option<ControlMode>,
}

/// Decode a status packet. Packets shorter than
/// [`STATUS_PACKET_MIN_LEN`] are dropped.
pub fn decode_status_packet(data: &[u8]) -> Option<StatusFrame> {
    if data.len() < STATUS_PACKET_MIN_LEN {
        return None;
    }

    let major = f32::from(data[VOLTAGE_MAJOR_OFFSET]);
    let minor = f32::from(data[VOLTAGE_MINOR_OFFSET]) / 100.0;

    Some(StatusFrame {
        voltage: major + minor,
        code_present: data[ROBOT_STATUS_OFFSET] != NO_PROGRAM,
        control_echo: control_mode_from_code(data[CONTROL_ECHO_OFFSET]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test_log::test]
    fn joystick_block_matches_reference_bytes() {
        let joystick = Joystick {
            axes: vec![1.0],
            buttons: vec![true, false, true],
            pov_hats: vec![],
        };

        let mut buf = Vec::new();
        encode_joystick(&joystick, &mut buf);
        assert_eq!(buf, [7, JOYSTICK_HEADER, 1, 0x7F, 3, 0b0000_0101, 0]);
    }

    #[test_log::test]
    fn axis_scaling_truncates_toward_zero() {
        let joystick = Joystick {
            axes: vec![1.0, -1.0, 0.0, 0.5],
            buttons: vec![],
            pov_hats: vec![],
        };

        let mut buf = Vec::new();
        encode_joystick(&joystick, &mut buf);
        let axes = &buf[3..7];
        assert_eq!(axes, [0x7F, 0x81, 0x00, 0x3F]); // 127, -127, 0, 63
    }

    #[test_log::test]
    fn button_bytes_round_up_when_not_a_multiple_of_eight() {
        let joystick = Joystick {
            buttons: vec![true; 9],
            ..Joystick::default()
        };
        assert_eq!(joystick_block_len(&joystick), 5 + 2);

        let mut buf = Vec::new();
        encode_joystick(&joystick, &mut buf);
        assert_eq!(&buf[3..6], [9, 0xFF, 0x01]);
    }

    #[test_log::test]
    fn released_hat_encodes_low_byte_and_zero_fill() {
        let joystick = Joystick {
            pov_hats: vec![-1, 270],
            ..Joystick::default()
        };

        let mut buf = Vec::new();
        encode_joystick(&joystick, &mut buf);
        assert_eq!(&buf[4..], [2, 0xFF, 0x00, 0x0E, 0x00]);
    }

    #[test_log::test]
    fn decode_rejects_missing_section_tag() {
        let mut data: &[u8] = &[5, 0x99, 0, 0, 0];
        assert!(decode_joystick(&mut data).is_none());
    }

    #[test_log::test]
    fn decode_rejects_truncated_block() {
        let joystick = Joystick {
            axes: vec![0.25, -0.25],
            buttons: vec![true],
            pov_hats: vec![90],
        };
        let mut buf = Vec::new();
        encode_joystick(&joystick, &mut buf);

        for cut in 0..buf.len() {
            let mut data = &buf[..cut];
            assert!(decode_joystick(&mut data).is_none(), "cut at {cut}");
        }
    }

    #[test_log::test]
    fn status_packet_reports_centivolts() {
        let data = [0, 1, GENERAL_HEADER, 0x04, 1, 12, 34];
        assert!(decode_status_packet(&data).is_none(), "7 bytes is short");

        let data = [0, 1, GENERAL_HEADER, 0x04, 1, 12, 34, 0];
        let frame = decode_status_packet(&data).unwrap();
        assert!((frame.voltage - 12.34).abs() < 0.005);
        assert!(frame.code_present);
        assert_eq!(frame.control_echo, Some(ControlMode::TeleOperated));
    }

    #[test_log::test]
    fn status_packet_without_program_or_known_echo() {
        let data = [0, 1, GENERAL_HEADER, 0x7E, NO_PROGRAM, 11, 0, 0];
        let frame = decode_status_packet(&data).unwrap();
        assert!(!frame.code_present);
        assert_eq!(frame.control_echo, None);
    }

    fn joystick_strategy() -> impl Strategy<Value = Joystick> {
        (
            proptest::collection::vec(-1.0f32..=1.0, 0..6),
            proptest::collection::vec(any::<bool>(), 0..20),
            proptest::collection::vec(prop_oneof![Just(-1i16), 0i16..360], 0..4),
        )
            .prop_map(|(axes, buttons, pov_hats)| Joystick {
                axes,
                buttons,
                pov_hats,
            })
    }

    proptest! {
        /// Decoding an encoded block preserves the counts exactly and the
        /// buttons bit-for-bit.
        #[test]
        fn joystick_block_round_trips(joystick in joystick_strategy()) {
            let mut buf = Vec::new();
            encode_joystick(&joystick, &mut buf);
            prop_assert_eq!(buf.len(), joystick_block_len(&joystick));

            let mut data = &buf[..];
            let block = decode_joystick(&mut data).unwrap();
            prop_assert_eq!(data.len(), 0, "decoder must consume the block");

            prop_assert_eq!(block.axes.len(), joystick.num_axes());
            prop_assert_eq!(block.pov_hats.len(), joystick.num_pov_hats());
            prop_assert_eq!(block.buttons, joystick.buttons);
        }
    }
}

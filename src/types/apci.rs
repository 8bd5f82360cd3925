//! IEC 60870-5-104 APCI (Application Protocol Control Information).
//!
//! APCI is the 6-byte header of an APDU: start byte, length, and a 4-byte
//! control field distinguishing I-, S- and U-frames.
//!
//! Sequence numbers are carried *pre-shifted*: the stored `u16` is the raw
//! little-endian control-field value with bit 0 clear, i.e. `N << 1` for
//! sequence number `N`. Advancing a sequence number adds 2; natural `u16`
//! wraparound gives the modulo-2^15 semantics of the wire.

use crate::error::{Iec104Error, Result};

/// Start byte for IEC 104 frames.
pub const START_BYTE: u8 = 0x68;

/// Minimum APDU length (APCI control field only, no ASDU).
pub const MIN_APDU_LENGTH: usize = 4;

/// Minimum APDU length of an I-frame (control field + ASDU header + IOA
/// reaches at least this far).
pub const MIN_I_FRAME_LENGTH: usize = 12;

/// Maximum APDU length.
pub const MAX_APDU_LENGTH: usize = 253;

/// U-frame function codes, one-hot in the first control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFunction {
    /// STARTDT act (Start Data Transfer activation)
    StartDtAct,
    /// STARTDT con (Start Data Transfer confirmation)
    StartDtCon,
    /// STOPDT act (Stop Data Transfer activation)
    StopDtAct,
    /// STOPDT con (Stop Data Transfer confirmation)
    StopDtCon,
    /// TESTFR act (Test Frame activation)
    TestFrAct,
    /// TESTFR con (Test Frame confirmation)
    TestFrCon,
}

impl UFunction {
    /// Get the control field byte for this U-function.
    pub const fn control_byte(&self) -> u8 {
        match self {
            Self::StartDtAct => 0x07,
            Self::StartDtCon => 0x0B,
            Self::StopDtAct => 0x13,
            Self::StopDtCon => 0x23,
            Self::TestFrAct => 0x43,
            Self::TestFrCon => 0x83,
        }
    }

    /// Parse U-function from the first control byte.
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        match byte {
            0x07 => Ok(Self::StartDtAct),
            0x0B => Ok(Self::StartDtCon),
            0x13 => Ok(Self::StopDtAct),
            0x23 => Ok(Self::StopDtCon),
            0x43 => Ok(Self::TestFrAct),
            0x83 => Ok(Self::TestFrCon),
            _ => Err(Iec104Error::invalid_frame(format!(
                "Unknown U-frame function: 0x{byte:02X}"
            ))),
        }
    }

    /// Human-readable name, e.g. "STARTDT act".
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartDtAct => "STARTDT act",
            Self::StartDtCon => "STARTDT con",
            Self::StopDtAct => "STOPDT act",
            Self::StopDtCon => "STOPDT con",
            Self::TestFrAct => "TESTFR act",
            Self::TestFrCon => "TESTFR con",
        }
    }
}

/// APCI control field, decoded.
///
/// ```text
/// +--------+--------+--------+--------+--------+--------+
/// | 0x68   | Length | CF1    | CF2    | CF3    | CF4    |
/// +--------+--------+--------+--------+--------+--------+
///   Start    APDU     Control Field (4 bytes)
///   Byte     Length
/// ```
///
/// `ns`/`nr` hold the shifted send/receive sequence numbers (see module doc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    /// I-frame: numbered information transfer, always followed by an ASDU.
    IFrame {
        /// Send sequence number, shifted (bit 0 clear)
        ns: u16,
        /// Receive sequence number, shifted (bit 0 clear)
        nr: u16,
    },
    /// S-frame: supervisory acknowledgement.
    SFrame {
        /// Receive sequence number, shifted (bit 0 clear)
        nr: u16,
    },
    /// U-frame: unnumbered control.
    UFrame {
        /// U-frame function
        function: UFunction,
    },
}

impl Apci {
    /// Create an I-frame APCI from shifted sequence numbers.
    pub const fn i_frame(ns: u16, nr: u16) -> Self {
        Self::IFrame { ns, nr }
    }

    /// Create an S-frame APCI from a shifted receive sequence number.
    pub const fn s_frame(nr: u16) -> Self {
        Self::SFrame { nr }
    }

    /// Create a U-frame APCI.
    pub const fn u_frame(function: UFunction) -> Self {
        Self::UFrame { function }
    }

    /// Parse the 4-byte control field.
    pub fn parse(control: &[u8]) -> Result<Self> {
        if control.len() < 4 {
            return Err(Iec104Error::invalid_frame_static("Control field too short"));
        }

        let cf1 = control[0];
        let c1 = u16::from_le_bytes([control[0], control[1]]);
        let c2 = u16::from_le_bytes([control[2], control[3]]);

        if cf1 & 0x01 == 0 {
            // I-frame: bit 0 of CF1 is 0
            Ok(Self::IFrame {
                ns: c1 & 0xFFFE,
                nr: c2 & 0xFFFE,
            })
        } else if cf1 & 0x03 == 0x01 {
            // S-frame: bits 0-1 are 01
            Ok(Self::SFrame { nr: c2 & 0xFFFE })
        } else {
            // U-frame: bits 0-1 are 11
            let function = UFunction::from_control_byte(cf1)?;
            Ok(Self::UFrame { function })
        }
    }

    /// Encode to the 4-byte control field.
    pub fn encode(&self) -> [u8; 4] {
        match self {
            Self::IFrame { ns, nr } => {
                let [c1a, c1b] = ns.to_le_bytes();
                let [c2a, c2b] = nr.to_le_bytes();
                [c1a, c1b, c2a, c2b]
            }
            Self::SFrame { nr } => {
                let [c2a, c2b] = nr.to_le_bytes();
                [0x01, 0x00, c2a, c2b]
            }
            Self::UFrame { function } => [function.control_byte(), 0x00, 0x00, 0x00],
        }
    }

    /// Encode the full 6-byte APDU header (start + length + control).
    ///
    /// `asdu_len` is the length of the ASDU that follows (0 for S/U-frames).
    pub fn encode_header(&self, asdu_len: usize) -> [u8; 6] {
        let control = self.encode();
        let apdu_len = (MIN_APDU_LENGTH + asdu_len) as u8;
        [
            START_BYTE, apdu_len, control[0], control[1], control[2], control[3],
        ]
    }

    /// Check if this is an I-frame.
    pub const fn is_i_frame(&self) -> bool {
        matches!(self, Self::IFrame { .. })
    }

    /// Check if this is an S-frame.
    pub const fn is_s_frame(&self) -> bool {
        matches!(self, Self::SFrame { .. })
    }

    /// Check if this is a U-frame.
    pub const fn is_u_frame(&self) -> bool {
        matches!(self, Self::UFrame { .. })
    }

    /// Unshifted send sequence number (I-frame only).
    pub const fn send_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { ns, .. } => Some(*ns >> 1),
            _ => None,
        }
    }

    /// Unshifted receive sequence number (I-frame and S-frame).
    pub const fn recv_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { nr, .. } | Self::SFrame { nr } => Some(*nr >> 1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Apci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IFrame { ns, nr } => write!(f, "I(S={}, R={})", ns >> 1, nr >> 1),
            Self::SFrame { nr } => write!(f, "S(R={})", nr >> 1),
            Self::UFrame { function } => write!(f, "U({})", function.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i_frame_encode_decode() {
        // sequence numbers 100 / 50, stored shifted
        let apci = Apci::i_frame(100 << 1, 50 << 1);
        let encoded = apci.encode();
        let decoded = Apci::parse(&encoded).unwrap();

        assert_eq!(decoded, apci);
        assert_eq!(decoded.send_seq(), Some(100));
        assert_eq!(decoded.recv_seq(), Some(50));
    }

    #[test]
    fn test_s_frame_encode_decode() {
        let apci = Apci::s_frame(200 << 1);
        let encoded = apci.encode();
        assert_eq!(encoded[0], 0x01);
        let decoded = Apci::parse(&encoded).unwrap();

        assert_eq!(decoded, apci);
        assert_eq!(decoded.send_seq(), None);
        assert_eq!(decoded.recv_seq(), Some(200));
    }

    #[test]
    fn test_u_frame_encode_decode() {
        for func in [
            UFunction::StartDtAct,
            UFunction::StartDtCon,
            UFunction::StopDtAct,
            UFunction::StopDtCon,
            UFunction::TestFrAct,
            UFunction::TestFrCon,
        ] {
            let apci = Apci::u_frame(func);
            let encoded = apci.encode();
            let decoded = Apci::parse(&encoded).unwrap();
            assert_eq!(decoded, apci);
        }
    }

    #[test]
    fn test_shifted_wire_form() {
        // Shifted storage is the raw wire value: N=1 encodes as 0x02 0x00
        let apci = Apci::i_frame(2, 0);
        assert_eq!(apci.encode(), [0x02, 0x00, 0x00, 0x00]);

        // N=32767 (max) -> shifted 0xFFFE
        let apci = Apci::i_frame(32767 << 1, 32767 << 1);
        assert_eq!(apci.encode(), [0xFE, 0xFF, 0xFE, 0xFF]);
        let decoded = Apci::parse(&apci.encode()).unwrap();
        assert_eq!(decoded.send_seq(), Some(32767));
        assert_eq!(decoded.recv_seq(), Some(32767));
    }

    #[test]
    fn test_sequence_advance_wraps_mod_2_15() {
        let mut ns: u16 = 32767 << 1;
        ns = ns.wrapping_add(2);
        assert_eq!(ns, 0);
    }

    #[test]
    fn test_unknown_u_function_rejected() {
        assert!(Apci::parse(&[0xFF, 0x00, 0x00, 0x00]).is_err());
        assert!(Apci::parse(&[0x0F, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_apci_display() {
        assert_eq!(Apci::i_frame(10 << 1, 5 << 1).to_string(), "I(S=10, R=5)");
        assert_eq!(Apci::s_frame(20 << 1).to_string(), "S(R=20)");
        assert_eq!(
            Apci::u_frame(UFunction::StartDtAct).to_string(),
            "U(STARTDT act)"
        );
    }
}

//! Unified indication records handed to the host.
//!
//! Every decoded monitoring object is normalised into a [`DataPoint`];
//! command ACT-CON / ACT-TERM echoes and outbound command requests share the
//! flat [`CommandObject`] shape.

use super::{Cot, Cp56Time2a, TypeId};

/// Double-point information value (2-bit state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoublePointValue {
    /// Indeterminate or intermediate (00)
    Indeterminate = 0,
    /// Determined OFF (01)
    Off = 1,
    /// Determined ON (10)
    On = 2,
    /// Indeterminate (11)
    IndeterminateOrFaulty = 3,
}

impl DoublePointValue {
    /// Parse from the lower 2 bits of a byte.
    pub const fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            1 => Self::Off,
            2 => Self::On,
            3 => Self::IndeterminateOrFaulty,
            _ => Self::Indeterminate,
        }
    }

    /// Raw 2-bit state.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Packed start events of protection equipment (SPE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartEvents {
    /// General start (GS)
    pub general: bool,
    /// Start phase L1
    pub l1: bool,
    /// Start phase L2
    pub l2: bool,
    /// Start phase L3
    pub l3: bool,
    /// Start earth current (SIE)
    pub earth: bool,
    /// Start reverse direction (SRD)
    pub reverse: bool,
}

impl StartEvents {
    /// Parse from the SPE byte.
    pub const fn from_u8(byte: u8) -> Self {
        Self {
            general: (byte & 0x01) != 0,
            l1: (byte & 0x02) != 0,
            l2: (byte & 0x04) != 0,
            l3: (byte & 0x08) != 0,
            earth: (byte & 0x10) != 0,
            reverse: (byte & 0x20) != 0,
        }
    }

    /// Encode to the SPE byte.
    pub const fn as_u8(&self) -> u8 {
        (self.general as u8)
            | ((self.l1 as u8) << 1)
            | ((self.l2 as u8) << 2)
            | ((self.l3 as u8) << 3)
            | ((self.earth as u8) << 4)
            | ((self.reverse as u8) << 5)
    }
}

/// Packed output circuit information of protection equipment (OCI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputCircuit {
    /// General command to output circuit (GC)
    pub general: bool,
    /// Command to output circuit phase L1
    pub l1: bool,
    /// Command to output circuit phase L2
    pub l2: bool,
    /// Command to output circuit phase L3
    pub l3: bool,
}

impl OutputCircuit {
    /// Parse from the OCI byte.
    pub const fn from_u8(byte: u8) -> Self {
        Self {
            general: (byte & 0x01) != 0,
            l1: (byte & 0x02) != 0,
            l2: (byte & 0x04) != 0,
            l3: (byte & 0x08) != 0,
        }
    }

    /// Encode to the OCI byte.
    pub const fn as_u8(&self) -> u8 {
        (self.general as u8)
            | ((self.l1 as u8) << 1)
            | ((self.l2 as u8) << 2)
            | ((self.l3 as u8) << 3)
    }
}

/// Data value variants for monitoring-direction objects.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// Single-point information (types 1, 2, 30)
    Single(bool),

    /// Double-point information (types 3, 4, 31)
    Double(DoublePointValue),

    /// Step position, -64..+63 with transient flag (types 5, 32)
    StepPosition {
        /// Tap position
        value: i8,
        /// Equipment in transient state
        transient: bool,
    },

    /// Bitstring of 32 bits (types 7, 33)
    Bitstring(u32),

    /// Normalized value scaled to [-1, 1) (types 9, 10, 21, 34)
    Normalized(f32),

    /// Scaled value (types 11, 12, 35)
    Scaled(i16),

    /// Short floating point (types 13, 14, 36)
    Float(f32),

    /// Binary counter reading with sequence and flags (types 15, 37)
    BinaryCounter {
        /// Counter reading
        value: i32,
        /// Sequence notation (0-31)
        sequence: u8,
        /// Carry flag
        carry: bool,
        /// Counter-adjusted flag
        adjusted: bool,
        /// Invalid flag
        invalid: bool,
    },

    /// Packed single-point with change detection (type 20)
    PackedSinglePoint {
        /// Status bits 1-16
        status: u16,
        /// Change-detection bits 1-16
        change: u16,
    },

    /// Event of protection equipment, 2-bit event state (type 38)
    ProtectionEvent(DoublePointValue),

    /// Packed start events of protection equipment (type 39)
    ProtectionStart(StartEvents),

    /// Packed output circuit information (type 40)
    ProtectionOutput(OutputCircuit),
}

impl DataValue {
    /// Numeric view of the value, wide enough for every payload.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Single(v) => *v as u8 as f64,
            Self::Double(v) => v.as_u8() as f64,
            Self::StepPosition { value, .. } => *value as f64,
            Self::Bitstring(v) => *v as f64,
            Self::Normalized(v) => *v as f64,
            Self::Scaled(v) => *v as f64,
            Self::Float(v) => *v as f64,
            Self::BinaryCounter { value, .. } => *value as f64,
            Self::PackedSinglePoint { status, .. } => *status as f64,
            Self::ProtectionEvent(v) => v.as_u8() as f64,
            Self::ProtectionStart(spe) => spe.general as u8 as f64,
            Self::ProtectionOutput(oci) => oci.general as u8 as f64,
        }
    }

    /// Boolean view for single/double points, `None` otherwise.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Single(v) => Some(*v),
            Self::Double(DoublePointValue::Off) => Some(false),
            Self::Double(DoublePointValue::On) => Some(true),
            _ => None,
        }
    }
}

/// Quality descriptor flags shared by all monitoring objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quality {
    /// Overflow (OV)
    pub overflow: bool,
    /// Blocked (BL)
    pub blocked: bool,
    /// Substituted (SB)
    pub substituted: bool,
    /// Not topical (NT)
    pub not_topical: bool,
    /// Invalid (IV)
    pub invalid: bool,
    /// Elapsed time invalid (EI, protection events)
    pub elapsed_invalid: bool,
}

impl Quality {
    /// Good quality, all flags clear.
    pub const GOOD: Self = Self {
        overflow: false,
        blocked: false,
        substituted: false,
        not_topical: false,
        invalid: false,
        elapsed_invalid: false,
    };

    /// Parse from a SIQ/DIQ byte (single/double point with quality).
    #[inline]
    pub const fn from_siq(byte: u8) -> Self {
        Self {
            overflow: false,
            blocked: (byte & 0x10) != 0,
            substituted: (byte & 0x20) != 0,
            not_topical: (byte & 0x40) != 0,
            invalid: (byte & 0x80) != 0,
            elapsed_invalid: false,
        }
    }

    /// Parse from a QDS byte (measured values; OV in bit 0).
    #[inline]
    pub const fn from_qds(byte: u8) -> Self {
        Self {
            overflow: (byte & 0x01) != 0,
            blocked: (byte & 0x10) != 0,
            substituted: (byte & 0x20) != 0,
            not_topical: (byte & 0x40) != 0,
            invalid: (byte & 0x80) != 0,
            elapsed_invalid: false,
        }
    }

    /// Parse from a protection-event qualifier byte (EI in bit 3).
    #[inline]
    pub const fn from_sep(byte: u8) -> Self {
        Self {
            overflow: false,
            blocked: (byte & 0x10) != 0,
            substituted: (byte & 0x20) != 0,
            not_topical: (byte & 0x40) != 0,
            invalid: (byte & 0x80) != 0,
            elapsed_invalid: (byte & 0x08) != 0,
        }
    }

    /// Encode to a QDS byte.
    pub const fn to_qds(&self) -> u8 {
        (self.overflow as u8)
            | ((self.blocked as u8) << 4)
            | ((self.substituted as u8) << 5)
            | ((self.not_topical as u8) << 6)
            | ((self.invalid as u8) << 7)
    }

    /// Check if the quality is good (all flags clear).
    #[inline]
    pub const fn is_good(&self) -> bool {
        !self.overflow
            && !self.blocked
            && !self.substituted
            && !self.not_topical
            && !self.invalid
            && !self.elapsed_invalid
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_good() {
            return f.write_str("good");
        }
        let flags = [
            (self.overflow, "ov"),
            (self.blocked, "bl"),
            (self.substituted, "sb"),
            (self.not_topical, "nt"),
            (self.invalid, "iv"),
            (self.elapsed_invalid, "ei"),
        ];
        let mut first = true;
        for (set, name) in flags {
            if set {
                if !first {
                    f.write_str("|")?;
                }
                first = false;
                f.write_str(name)?;
            }
        }
        Ok(())
    }
}

/// Unified indication record for one monitoring-direction object.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Information object address (24-bit)
    pub ioa: u32,
    /// Common address of the sending station
    pub common_address: u16,
    /// Cause of transmission
    pub cot: Cot,
    /// P/N flag (negative confirmation)
    pub negative: bool,
    /// Test flag
    pub test: bool,
    /// Type identification the value came from
    pub type_id: TypeId,
    /// Decoded value
    pub value: DataValue,
    /// Quality flags
    pub quality: Quality,
    /// Elapsed time in milliseconds (protection events)
    pub elapsed_ms: Option<u16>,
    /// CP56Time2a time tag, when the type carries one
    pub timestamp: Option<Cp56Time2a>,
}

impl DataPoint {
    /// Numeric view of the value.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.value.as_f64()
    }

    /// Boolean view for single/double points.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// Check if the point has good quality.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.quality.is_good()
    }
}

/// Flat command object, used both as `send_command` input and as the record
/// delivered for command ACT-CON / ACT-TERM replies.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandObject {
    /// Type identification (C_* or P_* type)
    pub type_id: TypeId,
    /// Information object address
    pub ioa: u32,
    /// Common address; 0 selects the configured slave address
    pub common_address: u16,
    /// Cause of transmission (forced to ACT on send)
    pub cot: Cot,
    /// P/N flag of a received reply
    pub negative: bool,
    /// Test flag of a received reply
    pub test: bool,
    /// Command value: SCS/DCS/RCS state, set-point value, QRP, or RQT
    pub value: f64,
    /// Select (true) / execute (false)
    pub select: bool,
    /// Command qualifier: QU for commands, QL for set-points
    pub qualifier: u8,
    /// Kind of parameter (KPA, parameter types)
    pub kpa: u8,
    /// Parameter operation flag (POP)
    pub pop: bool,
    /// Local parameter change flag (LPC)
    pub lpc: bool,
    /// Qualifier of parameter activation (QPA, type 113)
    pub qpa: u8,
    /// Freeze qualifier (FRZ, counter interrogation)
    pub freeze: u8,
    /// Time tag: stamped by the builder for time-tagged types, carried
    /// through for clock sync
    pub timestamp: Option<Cp56Time2a>,
}

impl Default for CommandObject {
    fn default() -> Self {
        Self {
            type_id: TypeId::SingleCommand,
            ioa: 0,
            common_address: 0,
            cot: Cot::Activation,
            negative: false,
            test: false,
            value: 0.0,
            select: false,
            qualifier: 0,
            kpa: 0,
            pop: false,
            lpc: false,
            qpa: 0,
            freeze: 0,
            timestamp: None,
        }
    }
}

impl CommandObject {
    /// Single command (type 45). `on` maps to SCS.
    pub fn single(ioa: u32, on: bool) -> Self {
        Self {
            type_id: TypeId::SingleCommand,
            ioa,
            value: on as u8 as f64,
            ..Default::default()
        }
    }

    /// Double command (type 46). `state` is the 2-bit DCS (1 = OFF, 2 = ON).
    pub fn double(ioa: u32, state: u8) -> Self {
        Self {
            type_id: TypeId::DoubleCommand,
            ioa,
            value: (state & 0x03) as f64,
            ..Default::default()
        }
    }

    /// Regulating step command (type 47). `step` is the 2-bit RCS
    /// (1 = lower, 2 = higher).
    pub fn regulating_step(ioa: u32, step: u8) -> Self {
        Self {
            type_id: TypeId::RegulatingStep,
            ioa,
            value: (step & 0x03) as f64,
            ..Default::default()
        }
    }

    /// Set-point command, normalized (type 48). `value` is the raw i16 count.
    pub fn setpoint_normalized(ioa: u32, value: i16) -> Self {
        Self {
            type_id: TypeId::SetpointNormalized,
            ioa,
            value: value as f64,
            ..Default::default()
        }
    }

    /// Set-point command, scaled (type 49).
    pub fn setpoint_scaled(ioa: u32, value: i16) -> Self {
        Self {
            type_id: TypeId::SetpointScaled,
            ioa,
            value: value as f64,
            ..Default::default()
        }
    }

    /// Set-point command, short floating point (type 50).
    pub fn setpoint_float(ioa: u32, value: f32) -> Self {
        Self {
            type_id: TypeId::SetpointFloat,
            ioa,
            value: value as f64,
            ..Default::default()
        }
    }

    /// Read command (type 102).
    pub fn read(ioa: u32) -> Self {
        Self {
            type_id: TypeId::ReadCommand,
            ioa,
            ..Default::default()
        }
    }

    /// Counter interrogation command (type 101). `rqt` is the 6-bit request
    /// qualifier, `freeze` the 2-bit freeze qualifier.
    pub fn counter_interrogation(rqt: u8, freeze: u8) -> Self {
        Self {
            type_id: TypeId::CounterInterrogation,
            value: rqt as f64,
            freeze,
            ..Default::default()
        }
    }

    /// Clock synchronization command (type 103) carrying the given time.
    pub fn clock_sync(time: Cp56Time2a) -> Self {
        Self {
            type_id: TypeId::ClockSync,
            timestamp: Some(time),
            ..Default::default()
        }
    }

    /// Reset process command (type 105). `qrp` is the reset qualifier.
    pub fn reset_process(qrp: u8) -> Self {
        Self {
            type_id: TypeId::ResetProcess,
            value: qrp as f64,
            ..Default::default()
        }
    }

    /// Test command with time tag (type 107); the engine assigns the test
    /// sequence counter and timestamp at send time.
    pub fn test_with_time() -> Self {
        Self {
            type_id: TypeId::TestCommandTime56,
            ..Default::default()
        }
    }

    /// Switch a command to its time-tagged twin where one exists.
    pub fn with_time_tag(mut self) -> Self {
        self.type_id = match self.type_id {
            TypeId::SingleCommand => TypeId::SingleCommandTime56,
            TypeId::DoubleCommand => TypeId::DoubleCommandTime56,
            TypeId::RegulatingStep => TypeId::RegulatingStepTime56,
            TypeId::SetpointNormalized => TypeId::SetpointNormalizedTime56,
            TypeId::SetpointScaled => TypeId::SetpointScaledTime56,
            TypeId::SetpointFloat => TypeId::SetpointFloatTime56,
            other => other,
        };
        self
    }

    /// Set the select flag (builder style).
    pub fn select(mut self, select: bool) -> Self {
        self.select = select;
        self
    }

    /// Set the command qualifier (builder style).
    pub fn qualifier(mut self, qualifier: u8) -> Self {
        self.qualifier = qualifier;
        self
    }

    /// Set the common address (builder style).
    pub fn common_address(mut self, ca: u16) -> Self {
        self.common_address = ca;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_point_from_u8() {
        assert_eq!(DoublePointValue::from_u8(0), DoublePointValue::Indeterminate);
        assert_eq!(DoublePointValue::from_u8(1), DoublePointValue::Off);
        assert_eq!(DoublePointValue::from_u8(2), DoublePointValue::On);
        assert_eq!(
            DoublePointValue::from_u8(3),
            DoublePointValue::IndeterminateOrFaulty
        );
        // only the low 2 bits count
        assert_eq!(DoublePointValue::from_u8(0xFE), DoublePointValue::On);
    }

    #[test]
    fn test_start_events_roundtrip() {
        for byte in [0x00, 0x01, 0x2A, 0x3F] {
            assert_eq!(StartEvents::from_u8(byte).as_u8(), byte);
        }
        let spe = StartEvents::from_u8(0x31);
        assert!(spe.general);
        assert!(spe.earth);
        assert!(spe.reverse);
        assert!(!spe.l1);
    }

    #[test]
    fn test_output_circuit_roundtrip() {
        for byte in [0x00, 0x01, 0x0A, 0x0F] {
            assert_eq!(OutputCircuit::from_u8(byte).as_u8(), byte);
        }
    }

    #[test]
    fn test_data_value_as_f64() {
        assert_eq!(DataValue::Single(true).as_f64(), 1.0);
        assert_eq!(DataValue::Double(DoublePointValue::On).as_f64(), 2.0);
        assert_eq!(
            DataValue::StepPosition {
                value: -10,
                transient: false
            }
            .as_f64(),
            -10.0
        );
        assert_eq!(
            DataValue::Bitstring(0xDEADBEEF).as_f64(),
            0xDEADBEEFu32 as f64
        );
        assert_eq!(DataValue::Scaled(-1000).as_f64(), -1000.0);
        assert_eq!(
            DataValue::BinaryCounter {
                value: 123456,
                sequence: 5,
                carry: false,
                adjusted: false,
                invalid: false
            }
            .as_f64(),
            123456.0
        );
        assert_eq!(
            DataValue::PackedSinglePoint {
                status: 0x00F0,
                change: 0
            }
            .as_f64(),
            240.0
        );
    }

    #[test]
    fn test_data_value_as_bool() {
        assert_eq!(DataValue::Single(true).as_bool(), Some(true));
        assert_eq!(
            DataValue::Double(DoublePointValue::Off).as_bool(),
            Some(false)
        );
        assert_eq!(DataValue::Double(DoublePointValue::On).as_bool(), Some(true));
        assert_eq!(
            DataValue::Double(DoublePointValue::Indeterminate).as_bool(),
            None
        );
        assert_eq!(DataValue::Float(1.0).as_bool(), None);
    }

    #[test]
    fn test_quality_from_siq() {
        let q = Quality::from_siq(0x90);
        assert!(q.blocked);
        assert!(q.invalid);
        assert!(!q.substituted);
        assert!(!q.overflow);
    }

    #[test]
    fn test_quality_from_qds() {
        assert!(Quality::from_qds(0x01).overflow);
        assert!(Quality::from_qds(0x10).blocked);
        assert!(Quality::from_qds(0x20).substituted);
        assert!(Quality::from_qds(0x40).not_topical);
        assert!(Quality::from_qds(0x80).invalid);

        let q = Quality::from_qds(0xF1);
        assert!(q.overflow && q.blocked && q.substituted && q.not_topical && q.invalid);
        assert_eq!(q.to_qds(), 0xF1);
    }

    #[test]
    fn test_quality_from_sep_elapsed_invalid() {
        let q = Quality::from_sep(0x08);
        assert!(q.elapsed_invalid);
        assert!(!q.is_good());
        assert!(!Quality::from_sep(0x00).elapsed_invalid);
    }

    #[test]
    fn test_quality_display() {
        assert_eq!(Quality::GOOD.to_string(), "good");
        assert_eq!(Quality::from_qds(0x81).to_string(), "ov|iv");
        let q = Quality {
            elapsed_invalid: true,
            ..Default::default()
        };
        assert_eq!(q.to_string(), "ei");
    }

    #[test]
    fn test_command_object_constructors() {
        let cmd = CommandObject::single(42, true);
        assert_eq!(cmd.type_id, TypeId::SingleCommand);
        assert_eq!(cmd.ioa, 42);
        assert_eq!(cmd.value, 1.0);
        assert_eq!(cmd.cot, Cot::Activation);
        assert!(!cmd.select);

        let cmd = CommandObject::double(7, 2).select(true).qualifier(1);
        assert_eq!(cmd.type_id, TypeId::DoubleCommand);
        assert!(cmd.select);
        assert_eq!(cmd.qualifier, 1);

        let cmd = CommandObject::setpoint_float(100, 3.5).common_address(2);
        assert_eq!(cmd.common_address, 2);
        assert_eq!(cmd.value, 3.5);
    }

    #[test]
    fn test_command_object_with_time_tag() {
        assert_eq!(
            CommandObject::single(1, true).with_time_tag().type_id,
            TypeId::SingleCommandTime56
        );
        assert_eq!(
            CommandObject::regulating_step(1, 1).with_time_tag().type_id,
            TypeId::RegulatingStepTime56
        );
        // types without a twin stay put
        assert_eq!(
            CommandObject::read(1).with_time_tag().type_id,
            TypeId::ReadCommand
        );
    }
}

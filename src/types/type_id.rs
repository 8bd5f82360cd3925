//! IEC 60870-5-104 Type Identification.
//!
//! The enum covers every type identifier the engine can decode or build.
//! Identifiers outside this set (including the file-transfer types 120-126)
//! are rejected at decode time and the carrying ASDU is discarded.

use crate::error::{Iec104Error, Result};

/// IEC 60870-5-104 Type Identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    // ============================================
    // Process information in monitoring direction
    // ============================================
    /// Single-point information (M_SP_NA_1)
    SinglePoint = 1,

    /// Single-point information with CP24Time2a time tag (M_SP_TA_1)
    SinglePointTime24 = 2,

    /// Double-point information (M_DP_NA_1)
    DoublePoint = 3,

    /// Double-point information with CP24Time2a time tag (M_DP_TA_1)
    DoublePointTime24 = 4,

    /// Step position information (M_ST_NA_1)
    StepPosition = 5,

    /// Bitstring of 32 bit (M_BO_NA_1)
    Bitstring32 = 7,

    /// Measured value, normalized (M_ME_NA_1)
    MeasuredNormalized = 9,

    /// Measured value, normalized with CP24Time2a time tag (M_ME_TA_1)
    MeasuredNormalizedTime24 = 10,

    /// Measured value, scaled (M_ME_NB_1)
    MeasuredScaled = 11,

    /// Measured value, scaled with CP24Time2a time tag (M_ME_TB_1)
    MeasuredScaledTime24 = 12,

    /// Measured value, short floating point (M_ME_NC_1)
    MeasuredFloat = 13,

    /// Measured value, short floating point with CP24Time2a time tag (M_ME_TC_1)
    MeasuredFloatTime24 = 14,

    /// Integrated totals (M_IT_NA_1)
    IntegratedTotals = 15,

    /// Packed single-point information with status change detection (M_PS_NA_1)
    PackedSinglePoint = 20,

    /// Measured value, normalized without quality descriptor (M_ME_ND_1)
    MeasuredNormalizedNoQuality = 21,

    /// Single-point information with time tag CP56Time2a (M_SP_TB_1)
    SinglePointTime56 = 30,

    /// Double-point information with time tag CP56Time2a (M_DP_TB_1)
    DoublePointTime56 = 31,

    /// Step position information with time tag CP56Time2a (M_ST_TB_1)
    StepPositionTime56 = 32,

    /// Bitstring of 32 bit with time tag CP56Time2a (M_BO_TB_1)
    Bitstring32Time56 = 33,

    /// Measured value, normalized with time tag CP56Time2a (M_ME_TD_1)
    MeasuredNormalizedTime56 = 34,

    /// Measured value, scaled with time tag CP56Time2a (M_ME_TE_1)
    MeasuredScaledTime56 = 35,

    /// Measured value, short floating point with time tag CP56Time2a (M_ME_TF_1)
    MeasuredFloatTime56 = 36,

    /// Integrated totals with time tag CP56Time2a (M_IT_TB_1)
    IntegratedTotalsTime56 = 37,

    /// Event of protection equipment with time tag CP56Time2a (M_EP_TD_1)
    ProtectionEventTime56 = 38,

    /// Packed start events of protection equipment with time tag (M_EP_TE_1)
    ProtectionStartTime56 = 39,

    /// Packed output circuit information of protection equipment (M_EP_TF_1)
    ProtectionOutputTime56 = 40,

    // ============================================
    // Process information in control direction
    // ============================================
    /// Single command (C_SC_NA_1)
    SingleCommand = 45,

    /// Double command (C_DC_NA_1)
    DoubleCommand = 46,

    /// Regulating step command (C_RC_NA_1)
    RegulatingStep = 47,

    /// Set-point command, normalized (C_SE_NA_1)
    SetpointNormalized = 48,

    /// Set-point command, scaled (C_SE_NB_1)
    SetpointScaled = 49,

    /// Set-point command, short floating point (C_SE_NC_1)
    SetpointFloat = 50,

    /// Single command with time tag CP56Time2a (C_SC_TA_1)
    SingleCommandTime56 = 58,

    /// Double command with time tag CP56Time2a (C_DC_TA_1)
    DoubleCommandTime56 = 59,

    /// Regulating step command with time tag CP56Time2a (C_RC_TA_1)
    RegulatingStepTime56 = 60,

    /// Set-point command, normalized with time tag CP56Time2a (C_SE_TA_1)
    SetpointNormalizedTime56 = 61,

    /// Set-point command, scaled with time tag CP56Time2a (C_SE_TB_1)
    SetpointScaledTime56 = 62,

    /// Set-point command, short floating point with time tag CP56Time2a (C_SE_TC_1)
    SetpointFloatTime56 = 63,

    // ============================================
    // System information in monitoring direction
    // ============================================
    /// End of initialization (M_EI_NA_1)
    EndOfInit = 70,

    // ============================================
    // System information in control direction
    // ============================================
    /// Interrogation command (C_IC_NA_1)
    InterrogationCommand = 100,

    /// Counter interrogation command (C_CI_NA_1)
    CounterInterrogation = 101,

    /// Read command (C_RD_NA_1)
    ReadCommand = 102,

    /// Clock synchronization command (C_CS_NA_1)
    ClockSync = 103,

    /// Test command (C_TS_NA_1)
    TestCommand = 104,

    /// Reset process command (C_RP_NA_1)
    ResetProcess = 105,

    /// Test command with time tag CP56Time2a (C_TS_TA_1)
    TestCommandTime56 = 107,

    // ============================================
    // Parameters in control direction
    // ============================================
    /// Parameter of measured value, normalized (P_ME_NA_1)
    ParameterNormalized = 110,

    /// Parameter of measured value, scaled (P_ME_NB_1)
    ParameterScaled = 111,

    /// Parameter of measured value, short floating point (P_ME_NC_1)
    ParameterFloat = 112,

    /// Parameter activation (P_AC_NA_1)
    ParameterActivation = 113,
}

impl TypeId {
    /// Create TypeId from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::SinglePoint),
            2 => Ok(Self::SinglePointTime24),
            3 => Ok(Self::DoublePoint),
            4 => Ok(Self::DoublePointTime24),
            5 => Ok(Self::StepPosition),
            7 => Ok(Self::Bitstring32),
            9 => Ok(Self::MeasuredNormalized),
            10 => Ok(Self::MeasuredNormalizedTime24),
            11 => Ok(Self::MeasuredScaled),
            12 => Ok(Self::MeasuredScaledTime24),
            13 => Ok(Self::MeasuredFloat),
            14 => Ok(Self::MeasuredFloatTime24),
            15 => Ok(Self::IntegratedTotals),
            20 => Ok(Self::PackedSinglePoint),
            21 => Ok(Self::MeasuredNormalizedNoQuality),
            30 => Ok(Self::SinglePointTime56),
            31 => Ok(Self::DoublePointTime56),
            32 => Ok(Self::StepPositionTime56),
            33 => Ok(Self::Bitstring32Time56),
            34 => Ok(Self::MeasuredNormalizedTime56),
            35 => Ok(Self::MeasuredScaledTime56),
            36 => Ok(Self::MeasuredFloatTime56),
            37 => Ok(Self::IntegratedTotalsTime56),
            38 => Ok(Self::ProtectionEventTime56),
            39 => Ok(Self::ProtectionStartTime56),
            40 => Ok(Self::ProtectionOutputTime56),
            45 => Ok(Self::SingleCommand),
            46 => Ok(Self::DoubleCommand),
            47 => Ok(Self::RegulatingStep),
            48 => Ok(Self::SetpointNormalized),
            49 => Ok(Self::SetpointScaled),
            50 => Ok(Self::SetpointFloat),
            58 => Ok(Self::SingleCommandTime56),
            59 => Ok(Self::DoubleCommandTime56),
            60 => Ok(Self::RegulatingStepTime56),
            61 => Ok(Self::SetpointNormalizedTime56),
            62 => Ok(Self::SetpointScaledTime56),
            63 => Ok(Self::SetpointFloatTime56),
            70 => Ok(Self::EndOfInit),
            100 => Ok(Self::InterrogationCommand),
            101 => Ok(Self::CounterInterrogation),
            102 => Ok(Self::ReadCommand),
            103 => Ok(Self::ClockSync),
            104 => Ok(Self::TestCommand),
            105 => Ok(Self::ResetProcess),
            107 => Ok(Self::TestCommandTime56),
            110 => Ok(Self::ParameterNormalized),
            111 => Ok(Self::ParameterScaled),
            112 => Ok(Self::ParameterFloat),
            113 => Ok(Self::ParameterActivation),
            _ => Err(Iec104Error::UnknownTypeId(value)),
        }
    }

    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Monitoring-direction process or system information (RTU to master).
    #[inline]
    pub const fn is_monitoring(&self) -> bool {
        matches!(self.as_u8(), 1..=40 | 70)
    }

    /// Control-direction command, system or parameter type (master to RTU).
    #[inline]
    pub const fn is_control(&self) -> bool {
        matches!(self.as_u8(), 45..=63 | 100..=107 | 110..=113)
    }

    /// Command, set-point, read or parameter types whose ACT-CON / ACT-TERM
    /// replies are surfaced as command responses.
    #[inline]
    pub const fn is_command_response(&self) -> bool {
        matches!(self.as_u8(), 45..=63 | 102 | 110..=113)
    }

    /// Check if this type carries a CP56Time2a time tag.
    #[inline]
    pub const fn has_time_tag(&self) -> bool {
        matches!(
            self,
            Self::SinglePointTime56
                | Self::DoublePointTime56
                | Self::StepPositionTime56
                | Self::Bitstring32Time56
                | Self::MeasuredNormalizedTime56
                | Self::MeasuredScaledTime56
                | Self::MeasuredFloatTime56
                | Self::IntegratedTotalsTime56
                | Self::ProtectionEventTime56
                | Self::ProtectionStartTime56
                | Self::ProtectionOutputTime56
                | Self::SingleCommandTime56
                | Self::DoubleCommandTime56
                | Self::RegulatingStepTime56
                | Self::SetpointNormalizedTime56
                | Self::SetpointScaledTime56
                | Self::SetpointFloatTime56
                | Self::TestCommandTime56
        )
    }

    /// Get the IEC standard name (e.g. "M_SP_NA_1").
    pub const fn standard_name(&self) -> &'static str {
        match self {
            Self::SinglePoint => "M_SP_NA_1",
            Self::SinglePointTime24 => "M_SP_TA_1",
            Self::DoublePoint => "M_DP_NA_1",
            Self::DoublePointTime24 => "M_DP_TA_1",
            Self::StepPosition => "M_ST_NA_1",
            Self::Bitstring32 => "M_BO_NA_1",
            Self::MeasuredNormalized => "M_ME_NA_1",
            Self::MeasuredNormalizedTime24 => "M_ME_TA_1",
            Self::MeasuredScaled => "M_ME_NB_1",
            Self::MeasuredScaledTime24 => "M_ME_TB_1",
            Self::MeasuredFloat => "M_ME_NC_1",
            Self::MeasuredFloatTime24 => "M_ME_TC_1",
            Self::IntegratedTotals => "M_IT_NA_1",
            Self::PackedSinglePoint => "M_PS_NA_1",
            Self::MeasuredNormalizedNoQuality => "M_ME_ND_1",
            Self::SinglePointTime56 => "M_SP_TB_1",
            Self::DoublePointTime56 => "M_DP_TB_1",
            Self::StepPositionTime56 => "M_ST_TB_1",
            Self::Bitstring32Time56 => "M_BO_TB_1",
            Self::MeasuredNormalizedTime56 => "M_ME_TD_1",
            Self::MeasuredScaledTime56 => "M_ME_TE_1",
            Self::MeasuredFloatTime56 => "M_ME_TF_1",
            Self::IntegratedTotalsTime56 => "M_IT_TB_1",
            Self::ProtectionEventTime56 => "M_EP_TD_1",
            Self::ProtectionStartTime56 => "M_EP_TE_1",
            Self::ProtectionOutputTime56 => "M_EP_TF_1",
            Self::SingleCommand => "C_SC_NA_1",
            Self::DoubleCommand => "C_DC_NA_1",
            Self::RegulatingStep => "C_RC_NA_1",
            Self::SetpointNormalized => "C_SE_NA_1",
            Self::SetpointScaled => "C_SE_NB_1",
            Self::SetpointFloat => "C_SE_NC_1",
            Self::SingleCommandTime56 => "C_SC_TA_1",
            Self::DoubleCommandTime56 => "C_DC_TA_1",
            Self::RegulatingStepTime56 => "C_RC_TA_1",
            Self::SetpointNormalizedTime56 => "C_SE_TA_1",
            Self::SetpointScaledTime56 => "C_SE_TB_1",
            Self::SetpointFloatTime56 => "C_SE_TC_1",
            Self::EndOfInit => "M_EI_NA_1",
            Self::InterrogationCommand => "C_IC_NA_1",
            Self::CounterInterrogation => "C_CI_NA_1",
            Self::ReadCommand => "C_RD_NA_1",
            Self::ClockSync => "C_CS_NA_1",
            Self::TestCommand => "C_TS_NA_1",
            Self::ResetProcess => "C_RP_NA_1",
            Self::TestCommandTime56 => "C_TS_TA_1",
            Self::ParameterNormalized => "P_ME_NA_1",
            Self::ParameterScaled => "P_ME_NB_1",
            Self::ParameterFloat => "P_ME_NC_1",
            Self::ParameterActivation => "P_AC_NA_1",
        }
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.standard_name())
    }
}

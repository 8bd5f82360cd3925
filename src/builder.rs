//! Outbound command ASDU construction.
//!
//! Builds the application payload for every command, set-point, system and
//! parameter ASDU the master can transmit. The cause of transmission is
//! forced to ACTIVATION and a zero common address is replaced by the
//! configured slave address, so callers only fill in what differs.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::info;

use crate::types::{
    Asdu, AsduHeader, CommandObject, Cot, Cp56Time2a, InformationObject, Ioa, TypeId,
};

/// Build the ASDU for an outbound command.
///
/// `tsc` is the session's test-sequence counter, consumed only by type 107.
/// Returns `None` for type identifiers the master cannot transmit; no side
/// effects occur in that case.
pub fn build_command(
    obj: &CommandObject,
    originator: u8,
    default_ca: u16,
    tsc: u16,
) -> Option<Asdu> {
    let ca = if obj.common_address == 0 {
        default_ca
    } else {
        obj.common_address
    };

    let data: Bytes = match obj.type_id {
        TypeId::SingleCommand => {
            let sco = command_state(obj, 0x01);
            info!(
                "SINGLE COMMAND ADDRESS {} SCS {} CA {} QU {} SE {}",
                obj.ioa, obj.value as u8 & 1, ca, obj.qualifier, obj.select as u8
            );
            Bytes::copy_from_slice(&[sco])
        }
        TypeId::SingleCommandTime56 => {
            let sco = command_state(obj, 0x01);
            info!(
                "SINGLE COMMAND W/TIME ADDRESS {} SCS {} CA {} QU {} SE {}",
                obj.ioa, obj.value as u8 & 1, ca, obj.qualifier, obj.select as u8
            );
            with_time(&[sco])
        }

        TypeId::DoubleCommand => {
            let dco = command_state(obj, 0x03);
            info!(
                "DOUBLE COMMAND ADDRESS {} DCS {} CA {} QU {} SE {}",
                obj.ioa, obj.value as u8 & 3, ca, obj.qualifier, obj.select as u8
            );
            Bytes::copy_from_slice(&[dco])
        }
        TypeId::DoubleCommandTime56 => {
            let dco = command_state(obj, 0x03);
            info!(
                "DOUBLE COMMAND W/TIME ADDRESS {} DCS {} CA {} QU {} SE {}",
                obj.ioa, obj.value as u8 & 3, ca, obj.qualifier, obj.select as u8
            );
            with_time(&[dco])
        }

        TypeId::RegulatingStep => {
            let rco = command_state(obj, 0x03);
            info!(
                "STEP REG. COMMAND ADDRESS {} RCS {} CA {} QU {} SE {}",
                obj.ioa, obj.value as u8 & 3, ca, obj.qualifier, obj.select as u8
            );
            Bytes::copy_from_slice(&[rco])
        }
        TypeId::RegulatingStepTime56 => {
            let rco = command_state(obj, 0x03);
            info!(
                "STEP REG. COMMAND W/TIME ADDRESS {} RCS {} CA {} QU {} SE {}",
                obj.ioa, obj.value as u8 & 3, ca, obj.qualifier, obj.select as u8
            );
            with_time(&[rco])
        }

        TypeId::SetpointNormalized => {
            info!(
                "NORMALISED COMMAND ADDRESS {} VAL {} CA {} SE {}",
                obj.ioa, obj.value as i16, ca, obj.select as u8
            );
            setpoint_i16(obj)
        }
        TypeId::SetpointNormalizedTime56 => {
            info!(
                "NORMALISED COMMAND W/TIME ADDRESS {} VAL {} CA {} SE {}",
                obj.ioa, obj.value as i16, ca, obj.select as u8
            );
            with_time(&setpoint_i16(obj))
        }

        TypeId::SetpointScaled => {
            info!(
                "SCALED COMMAND ADDRESS {} VAL {} CA {} SE {}",
                obj.ioa, obj.value as i16, ca, obj.select as u8
            );
            setpoint_i16(obj)
        }
        TypeId::SetpointScaledTime56 => {
            info!(
                "SCALED COMMAND W/TIME ADDRESS {} VAL {} CA {} SE {}",
                obj.ioa, obj.value as i16, ca, obj.select as u8
            );
            with_time(&setpoint_i16(obj))
        }

        TypeId::SetpointFloat => {
            info!(
                "FLOAT COMMAND ADDRESS {} VAL {} CA {} SE {}",
                obj.ioa, obj.value, ca, obj.select as u8
            );
            setpoint_f32(obj)
        }
        TypeId::SetpointFloatTime56 => {
            info!(
                "FLOAT COMMAND W/TIME ADDRESS {} VAL {} CA {} SE {}",
                obj.ioa, obj.value, ca, obj.select as u8
            );
            with_time(&setpoint_f32(obj))
        }

        TypeId::CounterInterrogation => {
            let qcc = (obj.value as u8 & 0x3F) | ((obj.freeze & 0x03) << 6);
            info!(
                "COUNTER INTERROGATION COMMAND ADDRESS {} RQT {} FRZ {}",
                obj.ioa, obj.value as u8 & 0x3F, obj.freeze
            );
            Bytes::copy_from_slice(&[qcc])
        }

        TypeId::ReadCommand => {
            info!("READ COMMAND ADDRESS {}", obj.ioa);
            Bytes::new()
        }

        TypeId::ClockSync => {
            let time = obj.timestamp.unwrap_or_else(Cp56Time2a::now);
            info!("CLOCK SYNC COMMAND CA {} {}", ca, time);
            Bytes::copy_from_slice(&time.to_bytes())
        }

        TypeId::ResetProcess => {
            let qrp = obj.value as u8;
            info!("RESET PROCESS COMMAND QRP {}", qrp);
            Bytes::copy_from_slice(&[qrp])
        }

        TypeId::TestCommandTime56 => {
            let time = Cp56Time2a::now();
            info!("TEST COMMAND WITH TIME TAG TSC {} {}", tsc, time);
            let mut buf = BytesMut::with_capacity(9);
            buf.put_u16_le(tsc);
            buf.put_slice(&time.to_bytes());
            buf.freeze()
        }

        TypeId::ParameterNormalized => {
            info!(
                "PARAMETER OF MEASURED NORMALIZED VALUE ADDRESS {} CA {} VAL {} KPA {} POP {} LPC {}",
                obj.ioa, ca, obj.value as i16, obj.kpa, obj.pop as u8, obj.lpc as u8
            );
            parameter_i16(obj)
        }
        TypeId::ParameterScaled => {
            info!(
                "PARAMETER OF MEASURED SCALED VALUE ADDRESS {} CA {} VAL {} KPA {} POP {} LPC {}",
                obj.ioa, ca, obj.value as i16, obj.kpa, obj.pop as u8, obj.lpc as u8
            );
            parameter_i16(obj)
        }
        TypeId::ParameterFloat => {
            info!(
                "PARAMETER OF MEASURED FLOAT VALUE ADDRESS {} CA {} VAL {} KPA {} POP {} LPC {}",
                obj.ioa, ca, obj.value, obj.kpa, obj.pop as u8, obj.lpc as u8
            );
            let mut buf = BytesMut::with_capacity(5);
            buf.put_f32_le(obj.value as f32);
            buf.put_u8(parameter_qualifier(obj));
            buf.freeze()
        }
        TypeId::ParameterActivation => {
            info!(
                "PARAMETER ACTIVATION ADDRESS {} QPA {} CA {}",
                obj.ioa, obj.qpa, ca
            );
            Bytes::copy_from_slice(&[obj.qpa])
        }

        _ => return None,
    };

    let header = AsduHeader::new(obj.type_id, 1, Cot::Activation, ca).with_originator(originator);
    let mut asdu = Asdu::new(header);
    asdu.objects.push(InformationObject::new(Ioa::new(obj.ioa), data));
    Some(asdu)
}

/// SCO/DCO/RCO byte: state in the low bits, QU in bits 2-6, S/E in bit 7.
fn command_state(obj: &CommandObject, state_mask: u8) -> u8 {
    (obj.value as u8 & state_mask) | ((obj.qualifier & 0x1F) << 2) | ((obj.select as u8) << 7)
}

/// QOS byte: QL in bits 0-6, S/E in bit 7.
fn setpoint_qualifier(obj: &CommandObject) -> u8 {
    (obj.qualifier & 0x7F) | ((obj.select as u8) << 7)
}

/// QPM byte: KPA in bits 0-5, POP in bit 6, LPC in bit 7.
fn parameter_qualifier(obj: &CommandObject) -> u8 {
    (obj.kpa & 0x3F) | ((obj.pop as u8) << 6) | ((obj.lpc as u8) << 7)
}

fn setpoint_i16(obj: &CommandObject) -> Bytes {
    let mut buf = BytesMut::with_capacity(3);
    buf.put_i16_le(obj.value as i16);
    buf.put_u8(setpoint_qualifier(obj));
    buf.freeze()
}

fn setpoint_f32(obj: &CommandObject) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_f32_le(obj.value as f32);
    buf.put_u8(setpoint_qualifier(obj));
    buf.freeze()
}

fn parameter_i16(obj: &CommandObject) -> Bytes {
    let mut buf = BytesMut::with_capacity(3);
    buf.put_i16_le(obj.value as i16);
    buf.put_u8(parameter_qualifier(obj));
    buf.freeze()
}

fn with_time(element: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(element.len() + 7);
    buf.put_slice(element);
    buf.put_slice(&Cp56Time2a::now().to_bytes());
    buf.freeze()
}

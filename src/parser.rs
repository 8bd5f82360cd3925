//! ASDU information-object decoding.
//!
//! Turns the raw object section of a received ASDU into unified
//! [`DataPoint`] records (monitoring direction) or a [`CommandObject`]
//! (command and parameter ACT-CON / ACT-TERM echoes). Decoding either fully
//! succeeds or the whole ASDU is rejected; no partial records escape.

use crate::error::{Iec104Error, Result};
use crate::types::{
    Asdu, CommandObject, Cp56Time2a, DataPoint, DataValue, DoublePointValue, OutputCircuit,
    Quality, StartEvents, TypeId,
};

/// Cursor over the object section, handling both addressing modes.
///
/// In SQ=1 mode one IOA heads the section and successive objects increment
/// the address; in SQ=0 mode each object carries its own IOA.
struct ObjectReader<'a> {
    data: &'a [u8],
    offset: usize,
    sequence: bool,
    ioa: u32,
    index: usize,
}

impl<'a> ObjectReader<'a> {
    fn new(data: &'a [u8], sequence: bool) -> Self {
        Self {
            data,
            offset: 0,
            sequence,
            ioa: 0,
            index: 0,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.offset + n > self.data.len() {
            return Err(Iec104Error::invalid_asdu_static(
                "object section truncated",
            ));
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn next_ioa(&mut self) -> Result<u32> {
        let ioa = if self.index == 0 || !self.sequence {
            let b = self.take(3)?;
            u32::from(b[0]) | (u32::from(b[1]) << 8) | (u32::from(b[2]) << 16)
        } else {
            self.ioa + 1
        };
        self.ioa = ioa;
        self.index += 1;
        Ok(ioa)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16_le(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn i32_le(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32_le(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn time56(&mut self) -> Result<Cp56Time2a> {
        Cp56Time2a::from_bytes(self.take(7)?)
    }

    /// CP24Time2a tags carry only milliseconds-of-minute; skipped.
    fn skip_time24(&mut self) -> Result<()> {
        self.take(3).map(|_| ())
    }
}

/// Sign-extend the 7-bit two's-complement VTI value field to -64..+63.
fn vti_value(vti: u8) -> i8 {
    (((vti & 0x7F) << 1) as i8) >> 1
}

/// Parse a monitoring-direction ASDU into unified indication records.
///
/// Returns an error for control-direction types; route those through
/// [`parse_command_response`] instead.
pub fn parse_asdu(asdu: &Asdu) -> Result<Vec<DataPoint>> {
    let header = &asdu.header;
    let count = header.vsq.count as usize;

    if count == 0 {
        return Err(Iec104Error::invalid_asdu_static("ASDU with zero objects"));
    }

    let mut rd = ObjectReader::new(&asdu.raw_data, header.vsq.sequence);
    let mut points = Vec::with_capacity(count);

    for _ in 0..count {
        let ioa = rd.next_ioa()?;
        let (value, quality, elapsed_ms, timestamp) = parse_element(header.type_id, &mut rd)?;

        points.push(DataPoint {
            ioa,
            common_address: header.common_address,
            cot: header.cot,
            negative: header.negative,
            test: header.test,
            type_id: header.type_id,
            value,
            quality,
            elapsed_ms,
            timestamp,
        });
    }

    Ok(points)
}

type Element = (DataValue, Quality, Option<u16>, Option<Cp56Time2a>);

fn parse_element(type_id: TypeId, rd: &mut ObjectReader<'_>) -> Result<Element> {
    match type_id {
        TypeId::SinglePoint => {
            let siq = rd.u8()?;
            Ok((
                DataValue::Single(siq & 0x01 != 0),
                Quality::from_siq(siq),
                None,
                None,
            ))
        }
        TypeId::SinglePointTime24 => {
            let siq = rd.u8()?;
            rd.skip_time24()?;
            Ok((
                DataValue::Single(siq & 0x01 != 0),
                Quality::from_siq(siq),
                None,
                None,
            ))
        }
        TypeId::SinglePointTime56 => {
            let siq = rd.u8()?;
            let time = rd.time56()?;
            Ok((
                DataValue::Single(siq & 0x01 != 0),
                Quality::from_siq(siq),
                None,
                Some(time),
            ))
        }

        TypeId::DoublePoint => {
            let diq = rd.u8()?;
            Ok((
                DataValue::Double(DoublePointValue::from_u8(diq)),
                Quality::from_siq(diq),
                None,
                None,
            ))
        }
        TypeId::DoublePointTime24 => {
            let diq = rd.u8()?;
            rd.skip_time24()?;
            Ok((
                DataValue::Double(DoublePointValue::from_u8(diq)),
                Quality::from_siq(diq),
                None,
                None,
            ))
        }
        TypeId::DoublePointTime56 => {
            let diq = rd.u8()?;
            let time = rd.time56()?;
            Ok((
                DataValue::Double(DoublePointValue::from_u8(diq)),
                Quality::from_siq(diq),
                None,
                Some(time),
            ))
        }

        TypeId::StepPosition | TypeId::StepPositionTime56 => {
            let vti = rd.u8()?;
            let qds = rd.u8()?;
            let time = if type_id == TypeId::StepPositionTime56 {
                Some(rd.time56()?)
            } else {
                None
            };
            Ok((
                DataValue::StepPosition {
                    value: vti_value(vti),
                    transient: vti & 0x80 != 0,
                },
                Quality::from_qds(qds),
                None,
                time,
            ))
        }

        TypeId::Bitstring32 | TypeId::Bitstring32Time56 => {
            let bsi = rd.u32_le()?;
            let qds = rd.u8()?;
            let time = if type_id == TypeId::Bitstring32Time56 {
                Some(rd.time56()?)
            } else {
                None
            };
            Ok((DataValue::Bitstring(bsi), Quality::from_qds(qds), None, time))
        }

        TypeId::MeasuredNormalized
        | TypeId::MeasuredNormalizedTime24
        | TypeId::MeasuredNormalizedTime56 => {
            let raw = rd.i16_le()?;
            let qds = rd.u8()?;
            let time = match type_id {
                TypeId::MeasuredNormalizedTime24 => {
                    rd.skip_time24()?;
                    None
                }
                TypeId::MeasuredNormalizedTime56 => Some(rd.time56()?),
                _ => None,
            };
            Ok((
                DataValue::Normalized(raw as f32 / 32768.0),
                Quality::from_qds(qds),
                None,
                time,
            ))
        }
        TypeId::MeasuredNormalizedNoQuality => {
            let raw = rd.i16_le()?;
            Ok((
                DataValue::Normalized(raw as f32 / 32768.0),
                Quality::GOOD,
                None,
                None,
            ))
        }

        TypeId::MeasuredScaled | TypeId::MeasuredScaledTime24 | TypeId::MeasuredScaledTime56 => {
            let sva = rd.i16_le()?;
            let qds = rd.u8()?;
            let time = match type_id {
                TypeId::MeasuredScaledTime24 => {
                    rd.skip_time24()?;
                    None
                }
                TypeId::MeasuredScaledTime56 => Some(rd.time56()?),
                _ => None,
            };
            Ok((DataValue::Scaled(sva), Quality::from_qds(qds), None, time))
        }

        TypeId::MeasuredFloat | TypeId::MeasuredFloatTime24 | TypeId::MeasuredFloatTime56 => {
            let mv = rd.f32_le()?;
            let qds = rd.u8()?;
            let time = match type_id {
                TypeId::MeasuredFloatTime24 => {
                    rd.skip_time24()?;
                    None
                }
                TypeId::MeasuredFloatTime56 => Some(rd.time56()?),
                _ => None,
            };
            Ok((DataValue::Float(mv), Quality::from_qds(qds), None, time))
        }

        TypeId::IntegratedTotals | TypeId::IntegratedTotalsTime56 => {
            let bcr = rd.i32_le()?;
            let flags = rd.u8()?;
            let time = if type_id == TypeId::IntegratedTotalsTime56 {
                Some(rd.time56()?)
            } else {
                None
            };
            let invalid = flags & 0x80 != 0;
            Ok((
                DataValue::BinaryCounter {
                    value: bcr,
                    sequence: flags & 0x1F,
                    carry: flags & 0x20 != 0,
                    adjusted: flags & 0x40 != 0,
                    invalid,
                },
                Quality {
                    invalid,
                    ..Default::default()
                },
                None,
                time,
            ))
        }

        TypeId::PackedSinglePoint => {
            let status = rd.u16_le()?;
            let change = rd.u16_le()?;
            let qds = rd.u8()?;
            Ok((
                DataValue::PackedSinglePoint { status, change },
                Quality::from_qds(qds),
                None,
                None,
            ))
        }

        TypeId::ProtectionEventTime56 => {
            let sep = rd.u8()?;
            let elapsed = rd.u16_le()?;
            let time = rd.time56()?;
            Ok((
                DataValue::ProtectionEvent(DoublePointValue::from_u8(sep)),
                Quality::from_sep(sep),
                Some(elapsed),
                Some(time),
            ))
        }
        TypeId::ProtectionStartTime56 => {
            let spe = rd.u8()?;
            let qdp = rd.u8()?;
            let elapsed = rd.u16_le()?;
            let time = rd.time56()?;
            Ok((
                DataValue::ProtectionStart(StartEvents::from_u8(spe)),
                Quality::from_sep(qdp),
                Some(elapsed),
                Some(time),
            ))
        }
        TypeId::ProtectionOutputTime56 => {
            let oci = rd.u8()?;
            let qdp = rd.u8()?;
            let elapsed = rd.u16_le()?;
            let time = rd.time56()?;
            Ok((
                DataValue::ProtectionOutput(OutputCircuit::from_u8(oci)),
                Quality::from_sep(qdp),
                Some(elapsed),
                Some(time),
            ))
        }

        other => Err(Iec104Error::invalid_asdu(format!(
            "{other} is not a monitoring type"
        ))),
    }
}

/// Parse a command, set-point, read or parameter ASDU received as an
/// ACT-CON / ACT-TERM echo into a flat command record.
pub fn parse_command_response(asdu: &Asdu) -> Result<CommandObject> {
    let header = &asdu.header;
    let mut rd = ObjectReader::new(&asdu.raw_data, false);

    let mut obj = CommandObject {
        type_id: header.type_id,
        ioa: rd.next_ioa()?,
        common_address: header.common_address,
        cot: header.cot,
        negative: header.negative,
        test: header.test,
        ..Default::default()
    };

    match header.type_id {
        TypeId::SingleCommand | TypeId::SingleCommandTime56 => {
            let sco = rd.u8()?;
            obj.value = (sco & 0x01) as f64;
            obj.qualifier = (sco >> 2) & 0x1F;
            obj.select = sco & 0x80 != 0;
            if header.type_id == TypeId::SingleCommandTime56 {
                obj.timestamp = Some(rd.time56()?);
            }
        }
        TypeId::DoubleCommand | TypeId::DoubleCommandTime56 => {
            let dco = rd.u8()?;
            obj.value = (dco & 0x03) as f64;
            obj.qualifier = (dco >> 2) & 0x1F;
            obj.select = dco & 0x80 != 0;
            if header.type_id == TypeId::DoubleCommandTime56 {
                obj.timestamp = Some(rd.time56()?);
            }
        }
        TypeId::RegulatingStep | TypeId::RegulatingStepTime56 => {
            let rco = rd.u8()?;
            obj.value = (rco & 0x03) as f64;
            obj.qualifier = (rco >> 2) & 0x1F;
            obj.select = rco & 0x80 != 0;
            if header.type_id == TypeId::RegulatingStepTime56 {
                obj.timestamp = Some(rd.time56()?);
            }
        }

        TypeId::SetpointNormalized | TypeId::SetpointNormalizedTime56 => {
            obj.value = rd.i16_le()? as f64;
            let qos = rd.u8()?;
            obj.qualifier = qos & 0x7F;
            obj.select = qos & 0x80 != 0;
            if header.type_id == TypeId::SetpointNormalizedTime56 {
                obj.timestamp = Some(rd.time56()?);
            }
        }
        TypeId::SetpointScaled | TypeId::SetpointScaledTime56 => {
            obj.value = rd.i16_le()? as f64;
            let qos = rd.u8()?;
            obj.qualifier = qos & 0x7F;
            obj.select = qos & 0x80 != 0;
            if header.type_id == TypeId::SetpointScaledTime56 {
                obj.timestamp = Some(rd.time56()?);
            }
        }
        TypeId::SetpointFloat | TypeId::SetpointFloatTime56 => {
            obj.value = rd.f32_le()? as f64;
            let qos = rd.u8()?;
            obj.qualifier = qos & 0x7F;
            obj.select = qos & 0x80 != 0;
            if header.type_id == TypeId::SetpointFloatTime56 {
                obj.timestamp = Some(rd.time56()?);
            }
        }

        TypeId::ReadCommand => {}

        TypeId::ParameterNormalized | TypeId::ParameterScaled => {
            obj.value = rd.i16_le()? as f64;
            let qpm = rd.u8()?;
            obj.kpa = qpm & 0x3F;
            obj.qualifier = obj.kpa;
            obj.pop = qpm & 0x40 != 0;
            obj.lpc = qpm & 0x80 != 0;
        }
        TypeId::ParameterFloat => {
            obj.value = rd.f32_le()? as f64;
            let qpm = rd.u8()?;
            obj.kpa = qpm & 0x3F;
            obj.qualifier = obj.kpa;
            obj.pop = qpm & 0x40 != 0;
            obj.lpc = qpm & 0x80 != 0;
        }
        TypeId::ParameterActivation => {
            let qpa = rd.u8()?;
            obj.qpa = qpa;
            obj.qualifier = qpa;
            obj.value = qpa as f64;
        }

        other => {
            return Err(Iec104Error::invalid_asdu(format!(
                "{other} is not a command type"
            )))
        }
    }

    Ok(obj)
}

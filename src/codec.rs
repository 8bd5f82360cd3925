//! IEC 60870-5-104 frame codec.
//!
//! Serialisation and deserialisation of APDUs (APCI header plus optional
//! ASDU) via the tokio-util codec traits. The decoder resynchronises on the
//! 0x68 start byte, skips garbage, and leaves partial frames buffered so a
//! later call can finish them.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{error, warn};

use crate::error::Iec104Error;
use crate::types::{
    Apci, Asdu, UFunction, MAX_APDU_LENGTH, MIN_APDU_LENGTH, MIN_I_FRAME_LENGTH, START_BYTE,
};

/// An IEC 104 APDU (Application Protocol Data Unit).
///
/// Contains the APCI control information and, for I-frames, the ASDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Apdu {
    /// APCI (Application Protocol Control Information)
    pub apci: Apci,
    /// ASDU (Application Service Data Unit) - only present in I-frames
    pub asdu: Option<Asdu>,
}

impl Apdu {
    /// Create an I-frame APDU from shifted sequence numbers and an ASDU.
    pub fn i_frame(ns: u16, nr: u16, asdu: Asdu) -> Self {
        Self {
            apci: Apci::i_frame(ns, nr),
            asdu: Some(asdu),
        }
    }

    /// Create an S-frame APDU from a shifted receive sequence number.
    pub fn s_frame(nr: u16) -> Self {
        Self {
            apci: Apci::s_frame(nr),
            asdu: None,
        }
    }

    /// Create a U-frame APDU.
    pub fn u_frame(function: UFunction) -> Self {
        Self {
            apci: Apci::u_frame(function),
            asdu: None,
        }
    }

    /// Check if this is an I-frame.
    pub fn is_i_frame(&self) -> bool {
        self.apci.is_i_frame()
    }

    /// Check if this is an S-frame.
    pub fn is_s_frame(&self) -> bool {
        self.apci.is_s_frame()
    }

    /// Check if this is a U-frame.
    pub fn is_u_frame(&self) -> bool {
        self.apci.is_u_frame()
    }
}

impl std::fmt::Display for Apdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apci)?;
        if let Some(asdu) = &self.asdu {
            write!(
                f,
                " [{}] COT={} CA={}",
                asdu.header.type_id, asdu.header.cot, asdu.header.common_address
            )?;
        }
        Ok(())
    }
}

/// IEC 60870-5-104 frame codec.
///
/// Stateful across calls: a frame split over several reads is resumed where
/// the previous call left off.
#[derive(Debug, Clone, Default)]
pub struct Iec104Codec {
    state: DecodeState,
}

#[derive(Debug, Clone, Default)]
enum DecodeState {
    #[default]
    Start,
    Length,
    Body {
        length: usize,
    },
}

impl Iec104Codec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes still missing to finish the frame currently buffered in
    /// `src`, if a frame is pending. Used by the receive path to size its
    /// bounded wait.
    pub fn bytes_needed(&self, src: &BytesMut) -> Option<usize> {
        match self.state {
            DecodeState::Start => (!src.is_empty()).then_some(2_usize.saturating_sub(src.len())),
            DecodeState::Length => Some(2_usize.saturating_sub(src.len())),
            DecodeState::Body { length } => Some((length + 2).saturating_sub(src.len())),
        }
        .filter(|&n| n > 0)
    }
}

impl Decoder for Iec104Codec {
    type Item = Apdu;
    type Error = Iec104Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            match &self.state {
                DecodeState::Start => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    if src[0] != START_BYTE {
                        // resynchronise: drop everything up to the next start byte
                        match src.iter().position(|&b| b == START_BYTE) {
                            Some(pos) => {
                                warn!("skipping {pos} bytes searching for frame start");
                                src.advance(pos);
                            }
                            None => {
                                warn!("skipping {} bytes searching for frame start", src.len());
                                src.clear();
                                return Ok(None);
                            }
                        }
                    }

                    self.state = DecodeState::Length;
                }

                DecodeState::Length => {
                    if src.len() < 2 {
                        return Ok(None);
                    }

                    let length = src[1] as usize;

                    if !(MIN_APDU_LENGTH..=MAX_APDU_LENGTH).contains(&length) {
                        // invalid length: drop the start byte and rescan
                        error!("invalid APDU length {length}, resynchronising");
                        src.advance(1);
                        self.state = DecodeState::Start;
                        continue;
                    }

                    self.state = DecodeState::Body { length };
                }

                DecodeState::Body { length } => {
                    let total = 2 + length;

                    if src.len() < total {
                        return Ok(None);
                    }

                    let frame = src.split_to(total).freeze();
                    let length = *length;
                    self.state = DecodeState::Start;

                    // [0x68] [len] [C1 lo] [C1 hi] [C2 lo] [C2 hi] [ASDU...]
                    let apci = Apci::parse(&frame[2..6])?;

                    let asdu = if apci.is_i_frame() {
                        if length < MIN_I_FRAME_LENGTH {
                            return Err(Iec104Error::invalid_frame(format!(
                                "I-frame too short for ASDU: length {length}"
                            )));
                        }
                        // unknown type or cause: keep the APCI so sequence
                        // accounting still happens, discard the ASDU
                        match Asdu::parse(&frame[6..]) {
                            Ok(asdu) => Some(asdu),
                            Err(
                                e @ (Iec104Error::UnknownTypeId(_)
                                | Iec104Error::UnknownCause(_)),
                            ) => {
                                warn!("!!! TYPE NOT IMPLEMENTED, discarding ASDU: {e}");
                                None
                            }
                            Err(e) => return Err(e),
                        }
                    } else {
                        None
                    };

                    return Ok(Some(Apdu { apci, asdu }));
                }
            }
        }
    }
}

impl Encoder<Apdu> for Iec104Codec {
    type Error = Iec104Error;

    fn encode(&mut self, item: Apdu, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let asdu_len = item.asdu.as_ref().map(|a| a.encoded_len()).unwrap_or(0);

        if asdu_len > MAX_APDU_LENGTH - MIN_APDU_LENGTH {
            return Err(Iec104Error::Codec(std::borrow::Cow::Borrowed(
                "ASDU too large",
            )));
        }

        dst.reserve(6 + asdu_len);
        dst.extend_from_slice(&item.apci.encode_header(asdu_len));

        if let Some(asdu) = &item.asdu {
            asdu.encode_to(dst);
        }

        Ok(())
    }
}

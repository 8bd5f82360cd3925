//! IEC 60870-5-104 ASDU (Application Service Data Unit).
//!
//! The ASDU carries the actual application data: a 6-byte header followed by
//! one or more information objects.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Datelike, Local, Timelike};

use crate::error::{Iec104Error, Result};
use crate::types::{Cot, TypeId};

/// Variable Structure Qualifier (VSQ).
///
/// Object count in the low 7 bits; bit 7 is the SQ (sequential address) flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vsq {
    /// Number of information objects (1-127)
    pub count: u8,
    /// SQ flag: if true, one IOA heads the ASDU and successive objects
    /// increment the address by one
    pub sequence: bool,
}

impl Vsq {
    /// Create a new VSQ.
    #[inline]
    pub const fn new(count: u8, sequence: bool) -> Self {
        Self { count, sequence }
    }

    /// Parse VSQ from byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            count: value & 0x7F,
            sequence: (value & 0x80) != 0,
        }
    }

    /// Encode VSQ to byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        (self.count & 0x7F) | if self.sequence { 0x80 } else { 0 }
    }
}

/// Information Object Address (IOA).
///
/// 24-bit little-endian address identifying a specific data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ioa(pub u32);

impl Ioa {
    /// Create IOA from u32 (lower 24 bits).
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value & 0x00FF_FFFF)
    }

    /// Parse IOA from 3 bytes (little-endian).
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 3 {
            return Err(Iec104Error::invalid_asdu_static("IOA too short"));
        }
        Ok(Self(
            bytes[0] as u32 | ((bytes[1] as u32) << 8) | ((bytes[2] as u32) << 16),
        ))
    }

    /// Encode IOA to 3 bytes (little-endian).
    #[inline]
    pub const fn to_bytes(self) -> [u8; 3] {
        [
            (self.0 & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            ((self.0 >> 16) & 0xFF) as u8,
        ]
    }

    /// Get the raw value.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Ioa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ASDU header (data unit identifier, 6 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsduHeader {
    /// Type identification
    pub type_id: TypeId,
    /// Variable structure qualifier
    pub vsq: Vsq,
    /// Cause of transmission
    pub cot: Cot,
    /// Test flag (bit 7 of the cause byte)
    pub test: bool,
    /// P/N flag (bit 6 of the cause byte; true = negative confirmation)
    pub negative: bool,
    /// Originator address (master OA, 0 if not used)
    pub originator: u8,
    /// Common address of ASDU (station address, little-endian u16)
    pub common_address: u16,
}

impl AsduHeader {
    /// Create a new ASDU header with the test and P/N flags clear.
    pub fn new(type_id: TypeId, count: u8, cot: Cot, common_address: u16) -> Self {
        Self {
            type_id,
            vsq: Vsq::new(count, false),
            cot,
            test: false,
            negative: false,
            originator: 0,
            common_address,
        }
    }

    /// Set the originator address (builder style).
    pub fn with_originator(mut self, originator: u8) -> Self {
        self.originator = originator;
        self
    }

    /// Parse ASDU header from bytes. Returns the header and bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 6 {
            return Err(Iec104Error::invalid_asdu_static("ASDU header too short"));
        }

        let type_id = TypeId::from_u8(data[0])?;
        let vsq = Vsq::from_u8(data[1]);

        let cot = Cot::from_u8(data[2])?;
        let negative = (data[2] & 0x40) != 0;
        let test = (data[2] & 0x80) != 0;

        let originator = data[3];
        let common_address = u16::from_le_bytes([data[4], data[5]]);

        Ok((
            Self {
                type_id,
                vsq,
                cot,
                test,
                negative,
                originator,
                common_address,
            },
            6,
        ))
    }

    /// Encode ASDU header to bytes.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.type_id.as_u8());
        buf.put_u8(self.vsq.as_u8());

        let mut cot_byte = self.cot.as_u8();
        if self.negative {
            cot_byte |= 0x40;
        }
        if self.test {
            cot_byte |= 0x80;
        }
        buf.put_u8(cot_byte);
        buf.put_u8(self.originator);
        buf.put_u16_le(self.common_address);
    }

    /// Get the encoded size in bytes.
    pub const fn encoded_size(&self) -> usize {
        6
    }
}

/// CP56Time2a absolute timestamp (7 bytes, bit-packed).
///
/// ```text
/// byte 0-1: milliseconds of minute (u16 LE, 0-59999)
/// byte 2:   minutes (6 bits) | res (1) | IV (1)
/// byte 3:   hours (5 bits) | res (2) | SU (1)
/// byte 4:   day of month (5 bits) | day of week (3 bits)
/// byte 5:   month (4 bits, 1-based) | res (4)
/// byte 6:   year (7 bits, offset from 2000) | res (1)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cp56Time2a {
    /// Milliseconds of the minute (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Hours (0-23)
    pub hours: u8,
    /// Day of month (1-31)
    pub day: u8,
    /// Day of week (1-7, 0 = unused)
    pub day_of_week: u8,
    /// Month (1-12)
    pub month: u8,
    /// Year (0-99, years since 2000)
    pub year: u8,
    /// Invalid flag
    pub invalid: bool,
    /// Summer time flag
    pub summer_time: bool,
}

impl Cp56Time2a {
    /// Capture the current local wall-clock time.
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            milliseconds: (now.second() * 1000) as u16
                + (now.timestamp_subsec_millis() % 1000) as u16,
            minutes: now.minute() as u8,
            hours: now.hour() as u8,
            day: now.day() as u8,
            day_of_week: now.weekday().number_from_monday() as u8,
            month: now.month() as u8,
            year: (now.year() % 100) as u8,
            invalid: false,
            summer_time: false,
        }
    }

    /// Parse from 7 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 7 {
            return Err(Iec104Error::invalid_asdu_static("CP56Time2a too short"));
        }

        Ok(Self {
            milliseconds: u16::from_le_bytes([bytes[0], bytes[1]]),
            minutes: bytes[2] & 0x3F,
            invalid: (bytes[2] & 0x80) != 0,
            hours: bytes[3] & 0x1F,
            summer_time: (bytes[3] & 0x80) != 0,
            day: bytes[4] & 0x1F,
            day_of_week: (bytes[4] >> 5) & 0x07,
            month: bytes[5] & 0x0F,
            year: bytes[6] & 0x7F,
        })
    }

    /// Encode to 7 bytes.
    pub fn to_bytes(&self) -> [u8; 7] {
        let [ms_lo, ms_hi] = self.milliseconds.to_le_bytes();
        [
            ms_lo,
            ms_hi,
            (self.minutes & 0x3F) | if self.invalid { 0x80 } else { 0 },
            (self.hours & 0x1F) | if self.summer_time { 0x80 } else { 0 },
            (self.day & 0x1F) | ((self.day_of_week & 0x07) << 5),
            self.month & 0x0F,
            self.year & 0x7F,
        ]
    }
}

impl std::fmt::Display for Cp56Time2a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}/{:02}/{:02} {:02}:{:02}:{:02}.{:03}{}{}",
            self.year as u16 + 2000,
            self.month,
            self.day,
            self.hours,
            self.minutes,
            self.milliseconds / 1000,
            self.milliseconds % 1000,
            if self.invalid { ".iv" } else { "" },
            if self.summer_time { ".su" } else { "" },
        )
    }
}

/// Information object: IOA plus the type-specific element bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct InformationObject {
    /// Information object address
    pub ioa: Ioa,
    /// Raw element bytes
    pub data: Bytes,
}

impl InformationObject {
    /// Create a new information object.
    pub fn new(ioa: Ioa, data: Bytes) -> Self {
        Self { ioa, data }
    }
}

/// Complete ASDU.
///
/// Outbound ASDUs are built via `objects`; inbound ASDUs keep the undecoded
/// object section in `raw_data` for the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    /// ASDU header
    pub header: AsduHeader,
    /// Information objects (outbound direction)
    pub objects: Vec<InformationObject>,
    /// Raw object section (inbound direction)
    pub raw_data: Bytes,
}

impl Asdu {
    /// Create a new empty ASDU.
    pub fn new(header: AsduHeader) -> Self {
        Self {
            header,
            objects: Vec::new(),
            raw_data: Bytes::new(),
        }
    }

    /// Create an interrogation command ASDU (type 100, cause ACT).
    ///
    /// `qoi` is 20 for station interrogation, 21-36 for groups 1-16.
    pub fn interrogation_command(common_address: u16, originator: u8, qoi: u8) -> Self {
        let mut asdu = Self::new(
            AsduHeader::new(
                TypeId::InterrogationCommand,
                1,
                Cot::Activation,
                common_address,
            )
            .with_originator(originator),
        );
        asdu.objects.push(InformationObject {
            ioa: Ioa::new(0),
            data: Bytes::copy_from_slice(&[qoi]),
        });
        asdu
    }

    /// Parse ASDU from bytes (everything after the APCI).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (header, header_len) = AsduHeader::parse(data)?;
        let raw_data = Bytes::copy_from_slice(&data[header_len..]);

        Ok(Self {
            header,
            objects: Vec::new(),
            raw_data,
        })
    }

    /// Encode ASDU to a fresh buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf
    }

    /// Encode ASDU directly into the provided buffer.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        self.header.encode(buf);

        for obj in &self.objects {
            buf.put_slice(&obj.ioa.to_bytes());
            buf.put_slice(&obj.data);
        }

        if self.objects.is_empty() && !self.raw_data.is_empty() {
            buf.put_slice(&self.raw_data);
        }
    }

    /// Calculate the encoded length of this ASDU.
    pub fn encoded_len(&self) -> usize {
        let mut len = self.header.encoded_size();
        for obj in &self.objects {
            len += 3 + obj.data.len();
        }
        if self.objects.is_empty() {
            len += self.raw_data.len();
        }
        len
    }
}

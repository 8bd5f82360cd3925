//! Error types for the IEC 60870-5-104 master engine.

use std::borrow::Cow;
use thiserror::Error;

/// Result type alias for IEC 104 operations.
pub type Result<T> = std::result::Result<T, Iec104Error>;

/// IEC 60870-5-104 protocol error types.
///
/// Uses `Cow<'static, str>` to avoid allocations for static error messages.
#[derive(Debug, Error)]
pub enum Iec104Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(Cow<'static, str>),

    /// Not connected to remote
    #[error("Not connected")]
    NotConnected,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(Cow<'static, str>),

    /// Invalid frame format
    #[error("Invalid frame: {0}")]
    InvalidFrame(Cow<'static, str>),

    /// Invalid ASDU
    #[error("Invalid ASDU: {0}")]
    InvalidAsdu(Cow<'static, str>),

    /// Unknown type identifier
    #[error("Unknown type ID: {0}")]
    UnknownTypeId(u8),

    /// Unknown cause of transmission
    #[error("Unknown COT: {0}")]
    UnknownCause(u8),

    /// Receive sequence mismatch; fatal when sequence-order checking is on.
    /// Both numbers are unshifted (0..32767).
    #[error("Sequence number mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u16, actual: u16 },

    /// Frame body never completed within the bounded wait
    #[error("Broken frame: body incomplete")]
    BrokenFrame,

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(Cow<'static, str>),
}

impl Iec104Error {
    /// Create a protocol error with a static message (zero allocation).
    #[inline]
    pub const fn protocol_static(msg: &'static str) -> Self {
        Self::Protocol(Cow::Borrowed(msg))
    }

    /// Create a protocol error with a dynamic message.
    #[inline]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(Cow::Owned(msg.into()))
    }

    /// Create an invalid frame error with a static message (zero allocation).
    #[inline]
    pub const fn invalid_frame_static(msg: &'static str) -> Self {
        Self::InvalidFrame(Cow::Borrowed(msg))
    }

    /// Create an invalid frame error with a dynamic message.
    #[inline]
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(Cow::Owned(msg.into()))
    }

    /// Create an invalid ASDU error with a static message (zero allocation).
    #[inline]
    pub const fn invalid_asdu_static(msg: &'static str) -> Self {
        Self::InvalidAsdu(Cow::Borrowed(msg))
    }

    /// Create an invalid ASDU error with a dynamic message.
    #[inline]
    pub fn invalid_asdu(msg: impl Into<String>) -> Self {
        Self::InvalidAsdu(Cow::Owned(msg.into()))
    }

    /// Errors that force the session back to Disconnected.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::NotConnected | Self::SequenceMismatch { .. }
        )
    }
}

//! Error types for the codec layer.
//!
//! Decoding distinguishes two outcomes that are not frames:
//!
//! - [`Incomplete`]: not enough bytes yet. This is transient and never surfaces as an error; the
//!   caller waits for more input without advancing its read cursor.
//! - [`ProtocolError`]: the bytes cannot be a valid frame. This is terminal for the connection; the
//!   remaining input cannot be trusted and decoding stops.
//!
//! [`CodecError`] wraps protocol errors together with I/O errors so the codec
//! can plug into `tokio_util`'s `Decoder` and `Encoder` traits.

use std::io;

use thiserror::Error;

/// Reason a decode attempt needs more input.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Incomplete {
    /// The fixed-size header has not fully arrived.
    #[error("incomplete frame header: have {have}, need {need}")]
    Header {
        /// Bytes currently available.
        have: usize,
        /// Bytes required for the complete header.
        need: usize,
    },

    /// The header is complete but the declared payload has not fully arrived.
    #[error("incomplete payload: have {have}, need {need}")]
    Payload {
        /// Payload bytes currently available.
        have: usize,
        /// Declared payload length.
        need: usize,
    },
}

/// Wire-level protocol violations.
///
/// Any of these terminates the connection: the input is never
/// resynchronised by scanning for the next marker byte.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The first byte of a frame was not the marker byte.
    #[error("invalid frame marker: {found:#04x}")]
    InvalidMarker {
        /// Byte found where the marker was expected.
        found: u8,
    },

    /// The frame declared an unsupported major protocol version.
    #[error("unsupported protocol major version: {major}")]
    UnsupportedVersion {
        /// Major version that was rejected.
        major: u8,
    },

    /// The frame declared an unrecognised payload type.
    #[error("unsupported payload type: {code:#06x}")]
    UnsupportedPayloadType {
        /// Payload type code that was not recognised.
        code: u16,
    },

    /// The declared payload length exceeds the configured maximum.
    #[error("payload exceeds max size: {size} > {max}")]
    PayloadTooLarge {
        /// Declared payload length.
        size: usize,
        /// Maximum accepted payload length.
        max: usize,
    },

    /// A programmatically built frame declared a length that differs from
    /// its payload.
    #[error("declared payload size {declared} does not match actual size {actual}")]
    PayloadSizeMismatch {
        /// Length written in the header.
        declared: u32,
        /// Length of the supplied payload.
        actual: usize,
    },
}

impl ProtocolError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidMarker { .. } => "invalid_marker",
            Self::UnsupportedVersion { .. } => "unsupported_version",
            Self::UnsupportedPayloadType { .. } => "unsupported_payload_type",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::PayloadSizeMismatch { .. } => "payload_size_mismatch",
        }
    }
}

/// Top-level codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport layer I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Returns the error category as a string for logging.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
        }
    }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => e,
            CodecError::Protocol(e) => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}

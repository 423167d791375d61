//! Wire frame types for the collector protocol.
//!
//! A frame is a fixed 12-byte header followed by an opaque payload:
//!
//! | Bytes   | Field                                  |
//! |---------|----------------------------------------|
//! | 0       | marker, always [`MARKER_BYTE`]         |
//! | 1       | major version                          |
//! | 2       | minor version                          |
//! | 3..6    | reserved, zero on write, ignored on read |
//! | 6..8    | payload type code (network order)      |
//! | 8..12   | payload length (network order `u32`)   |
//! | 12..    | payload                                |

use std::time::SystemTime;

use bytes::Bytes;

use crate::codec::ProtocolError;

/// First byte of every frame.
pub const MARKER_BYTE: u8 = 0xAA;
/// The only accepted major protocol version.
pub const SUPPORTED_VERSION_MAJOR: u8 = 1;
/// Minor version written by this implementation.
pub const DEFAULT_VERSION_MINOR: u8 = 0;
/// Fixed size of the frame header in bytes.
pub const HEADER_SIZE: usize = 12;
/// Number of reserved bytes following the version fields.
pub const RESERVED_BYTES: usize = 3;
/// Default upper bound on accepted payload sizes (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Payload encodings recognised by the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// A structured event encoded as protobuf.
    StructuredEvent,
}

impl PayloadType {
    /// Wire code of the structured-event/protobuf payload type.
    pub const STRUCTURED_EVENT_CODE: u16 = 0x0001;

    /// Return the on-wire code for this payload type.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::StructuredEvent => Self::STRUCTURED_EVENT_CODE,
        }
    }

    /// Look up a payload type from its wire code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            Self::STRUCTURED_EVENT_CODE => Some(Self::StructuredEvent),
            _ => None,
        }
    }
}

/// Header fields of a frame, excluding the marker and reserved bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Major protocol version.
    pub version_major: u8,
    /// Minor protocol version. Not checked on decode.
    pub version_minor: u8,
    /// Encoding of the payload.
    pub payload_type: PayloadType,
    /// Declared payload length in bytes.
    pub payload_size: u32,
}

impl FrameHeader {
    /// Header for a structured-event payload of `payload_size` bytes using
    /// the supported protocol version.
    #[must_use]
    pub const fn structured_event(payload_size: u32) -> Self {
        Self {
            version_major: SUPPORTED_VERSION_MAJOR,
            version_minor: DEFAULT_VERSION_MINOR,
            payload_type: PayloadType::StructuredEvent,
            payload_size,
        }
    }

    /// Total encoded size of a frame carrying this header.
    #[must_use]
    pub fn frame_len(&self) -> usize { HEADER_SIZE + self.payload_size as usize }
}

/// A complete, validated protocol frame.
///
/// Frames are immutable. The payload is owned by the frame until it is moved
/// into the next pipeline stage. Arrival time does not participate in
/// equality.
#[derive(Clone, Debug)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
    received_at: SystemTime,
}

impl Frame {
    /// Build a structured-event frame around `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the payload length does
    /// not fit the 32-bit length field.
    pub fn structured_event(payload: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        let payload_size = u32::try_from(payload.len()).map_err(|_| {
            ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: u32::MAX as usize,
            }
        })?;
        Ok(Self::from_validated(
            FrameHeader::structured_event(payload_size),
            payload,
            SystemTime::now(),
        ))
    }

    /// Assemble a frame from an explicit header and payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadSizeMismatch`] when the declared size
    /// differs from the payload length, and
    /// [`ProtocolError::UnsupportedVersion`] for an unsupported major version.
    pub fn from_parts(header: FrameHeader, payload: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        if header.payload_size as usize != payload.len() {
            return Err(ProtocolError::PayloadSizeMismatch {
                declared: header.payload_size,
                actual: payload.len(),
            });
        }
        if header.version_major != SUPPORTED_VERSION_MAJOR {
            return Err(ProtocolError::UnsupportedVersion {
                major: header.version_major,
            });
        }
        Ok(Self::from_validated(header, payload, SystemTime::now()))
    }

    pub(crate) fn from_validated(
        header: FrameHeader,
        payload: Bytes,
        received_at: SystemTime,
    ) -> Self {
        Self {
            header,
            payload,
            received_at,
        }
    }

    /// Borrow the frame header.
    #[must_use]
    pub const fn header(&self) -> &FrameHeader { &self.header }

    /// Major protocol version.
    #[must_use]
    pub const fn version_major(&self) -> u8 { self.header.version_major }

    /// Minor protocol version.
    #[must_use]
    pub const fn version_minor(&self) -> u8 { self.header.version_minor }

    /// Payload encoding.
    #[must_use]
    pub const fn payload_type(&self) -> PayloadType { self.header.payload_type }

    /// Payload length in bytes.
    #[must_use]
    pub const fn payload_size(&self) -> u32 { self.header.payload_size }

    /// Borrow the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] { self.payload.as_ref() }

    /// When the frame was decoded from the wire (or built).
    #[must_use]
    pub const fn received_at(&self) -> SystemTime { self.received_at }

    /// Encoded length of the whole frame.
    #[must_use]
    pub fn frame_len(&self) -> usize { self.header.frame_len() }

    /// Consume the frame, returning the owned payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.payload == other.payload
    }
}

impl Eq for Frame {}

//! Framing codec for the collector wire protocol.
//!
//! [`FrameCodec`] turns [`Frame`]s into bytes and back. Decoding is exposed
//! two ways:
//!
//! - [`FrameCodec::decode_one`] is a pure inspection of a byte buffer at an offset, reporting
//!   [`DecodeOutcome::Incomplete`], [`DecodeOutcome::Error`] or a decoded
//!   [`DecodeOutcome::Frame`] together with the number of bytes it spans.
//! - The `tokio_util` [`Decoder`] implementation consumes frames from the front of a `BytesMut`,
//!   which is what the [`reassembly`](crate::reassembly) layer builds on.
//!
//! Header fields are checked in wire order: the marker as soon as one byte
//! is present, then the version, payload type and declared size once the
//! full header has arrived. An oversized declared length is rejected from the
//! header alone, before any payload bytes are buffered.

use std::time::SystemTime;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{
    DEFAULT_MAX_PAYLOAD_SIZE,
    Frame,
    FrameHeader,
    HEADER_SIZE,
    MARKER_BYTE,
    PayloadType,
    RESERVED_BYTES,
    SUPPORTED_VERSION_MAJOR,
};

pub mod error;

pub use error::{CodecError, Incomplete, ProtocolError};

/// Result of attempting to decode a single frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// More bytes are needed. The read cursor must not move.
    Incomplete(Incomplete),
    /// The bytes at the offset cannot start a valid frame.
    Error(ProtocolError),
    /// A complete frame and the number of bytes it occupied.
    Frame(Frame, usize),
}

/// Outcome of inspecting a frame header without consuming anything.
enum HeaderCheck {
    Incomplete(Incomplete),
    Invalid(ProtocolError),
    Ready(FrameHeader),
}

/// Codec for the 12-byte-header collector framing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCodec {
    max_payload_size: usize,
}

impl FrameCodec {
    /// Construct a codec accepting payloads of at most `max_payload_size`
    /// bytes.
    ///
    /// The limit is clamped to what the 32-bit length field can express.
    #[must_use]
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            max_payload_size: max_payload_size.min(u32::MAX as usize),
        }
    }

    /// Return the maximum payload size accepted by this codec.
    #[must_use]
    pub const fn max_payload_size(&self) -> usize { self.max_payload_size }

    /// Encode `frame` into a fresh buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use event_collector::{codec::FrameCodec, frame::Frame};
    ///
    /// let frame = Frame::structured_event(vec![1_u8, 2, 3, 4]).expect("frame");
    /// let bytes = FrameCodec::encode(&frame);
    /// assert_eq!(bytes.len(), 16);
    /// assert_eq!(bytes[0], 0xAA);
    /// ```
    #[must_use]
    pub fn encode(frame: &Frame) -> Bytes {
        let mut dst = BytesMut::with_capacity(frame.frame_len());
        Self::encode_into(frame, &mut dst);
        dst.freeze()
    }

    /// Append the encoding of `frame` to `dst`.
    pub fn encode_into(frame: &Frame, dst: &mut BytesMut) {
        let header = frame.header();
        dst.reserve(frame.frame_len());
        dst.put_u8(MARKER_BYTE);
        dst.put_u8(header.version_major);
        dst.put_u8(header.version_minor);
        dst.put_bytes(0, RESERVED_BYTES);
        dst.put_u16(header.payload_type.code());
        dst.put_u32(header.payload_size);
        dst.extend_from_slice(frame.payload());
    }

    /// Attempt to decode one frame starting at `offset` in `buffer`.
    ///
    /// The payload of a decoded frame shares `buffer`'s memory.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytes::Bytes;
    /// use event_collector::codec::{DecodeOutcome, FrameCodec, Incomplete};
    ///
    /// let codec = FrameCodec::default();
    /// let outcome = codec.decode_one(&Bytes::from_static(&[0xAA, 0x01, 0x00]), 0);
    /// assert_eq!(
    ///     outcome,
    ///     DecodeOutcome::Incomplete(Incomplete::Header { have: 3, need: 12 })
    /// );
    /// ```
    #[must_use]
    pub fn decode_one(&self, buffer: &Bytes, offset: usize) -> DecodeOutcome {
        let src = buffer.get(offset..).unwrap_or_default();
        match self.check_header(src) {
            HeaderCheck::Incomplete(reason) => DecodeOutcome::Incomplete(reason),
            HeaderCheck::Invalid(err) => DecodeOutcome::Error(err),
            HeaderCheck::Ready(header) => {
                let start = offset + HEADER_SIZE;
                let consumed = header.frame_len();
                let payload = buffer.slice(start..offset + consumed);
                DecodeOutcome::Frame(
                    Frame::from_validated(header, payload, SystemTime::now()),
                    consumed,
                )
            }
        }
    }

    /// Split one complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` without touching `src` when more bytes are needed.
    /// On error `src` is also left untouched.
    pub(crate) fn decode_frame(&self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        match self.check_header(src) {
            HeaderCheck::Incomplete(reason) => {
                tracing::trace!(%reason, "awaiting more input");
                Ok(None)
            }
            HeaderCheck::Invalid(err) => Err(err),
            HeaderCheck::Ready(header) => {
                let mut bytes = src.split_to(header.frame_len());
                bytes.advance(HEADER_SIZE);
                Ok(Some(Frame::from_validated(
                    header,
                    bytes.freeze(),
                    SystemTime::now(),
                )))
            }
        }
    }

    fn check_header(&self, src: &[u8]) -> HeaderCheck {
        let Some(&marker) = src.first() else {
            return HeaderCheck::Incomplete(Incomplete::Header {
                have: 0,
                need: HEADER_SIZE,
            });
        };
        if marker != MARKER_BYTE {
            return HeaderCheck::Invalid(ProtocolError::InvalidMarker { found: marker });
        }
        let Some(mut header) = src.get(1..HEADER_SIZE) else {
            return HeaderCheck::Incomplete(Incomplete::Header {
                have: src.len(),
                need: HEADER_SIZE,
            });
        };

        let version_major = header.get_u8();
        let version_minor = header.get_u8();
        header.advance(RESERVED_BYTES);
        let code = header.get_u16();
        let payload_size = header.get_u32();

        if version_major != SUPPORTED_VERSION_MAJOR {
            return HeaderCheck::Invalid(ProtocolError::UnsupportedVersion {
                major: version_major,
            });
        }
        let Some(payload_type) = PayloadType::from_code(code) else {
            return HeaderCheck::Invalid(ProtocolError::UnsupportedPayloadType { code });
        };
        let declared = payload_size as usize;
        if declared > self.max_payload_size {
            return HeaderCheck::Invalid(ProtocolError::PayloadTooLarge {
                size: declared,
                max: self.max_payload_size,
            });
        }
        let available = src.len() - HEADER_SIZE;
        if available < declared {
            return HeaderCheck::Incomplete(Incomplete::Payload {
                have: available,
                need: declared,
            });
        }

        HeaderCheck::Ready(FrameHeader {
            version_major,
            version_minor,
            payload_type,
            payload_size,
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_PAYLOAD_SIZE) }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.decode_frame(src)?)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = item.payload().len();
        if size > self.max_payload_size {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: self.max_payload_size,
            }
            .into());
        }
        Self::encode_into(&item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests;

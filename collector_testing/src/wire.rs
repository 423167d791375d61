//! Raw wire-byte fixtures.
//!
//! These build bytes directly rather than through the codec's encoder so
//! they can also represent headers the encoder would never produce.

use bytes::{Bytes, BytesMut};
use event_collector::{
    codec::FrameCodec,
    frame::{Frame, MARKER_BYTE},
};

/// Encode `frames` back to back.
#[must_use]
pub fn encode_frames(frames: &[Frame]) -> Bytes {
    let mut dst = BytesMut::new();
    for frame in frames {
        FrameCodec::encode_into(frame, &mut dst);
    }
    dst.freeze()
}

/// Build a 12-byte header with arbitrary field values.
#[must_use]
pub fn raw_header(major: u8, payload_type: u16, declared_len: u32) -> Vec<u8> {
    let mut header = vec![MARKER_BYTE, major, 0, 0, 0, 0];
    header.extend_from_slice(&payload_type.to_be_bytes());
    header.extend_from_slice(&declared_len.to_be_bytes());
    header
}

/// Build a frame whose header declares `payload.len()` bytes.
///
/// # Panics
///
/// Panics if `payload` exceeds `u32::MAX` bytes.
#[must_use]
pub fn raw_frame(major: u8, payload_type: u16, payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).expect("payload fits the length field");
    let mut wire = raw_header(major, payload_type, len);
    wire.extend_from_slice(payload);
    wire
}

/// Split `wire` into chunks of at most `size` bytes.
///
/// # Panics
///
/// Panics if `size` is zero.
#[must_use]
pub fn split_every(wire: &Bytes, size: usize) -> Vec<Bytes> {
    assert!(size > 0, "chunk size must be non-zero");
    (0..wire.len())
        .step_by(size)
        .map(|start| wire.slice(start..(start + size).min(wire.len())))
        .collect()
}

/// Split `wire` at the given sorted offsets.
#[must_use]
pub fn split_at_offsets(wire: &Bytes, offsets: &[usize]) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(offsets.len() + 1);
    let mut start = 0;
    for &offset in offsets {
        let offset = offset.clamp(start, wire.len());
        chunks.push(wire.slice(start..offset));
        start = offset;
    }
    chunks.push(wire.slice(start..));
    chunks
}

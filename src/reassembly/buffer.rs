//! Per-connection byte accumulator.

use bytes::{Bytes, BytesMut};

use crate::{
    codec::{FrameCodec, ProtocolError},
    frame::Frame,
};

/// Append-only accumulator of received bytes with an implicit read cursor.
///
/// The front of the buffer is always the read cursor: decoded frames are
/// split off the front and take their bytes with them, so nothing before the
/// cursor is ever scanned twice. [`consumed`](Self::consumed) reports the
/// cursor's position in the connection's byte stream.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    bytes: BytesMut,
    consumed: u64,
    split_since_compact: bool,
}

impl ReassemblyBuffer {
    /// Create an empty buffer holding no memory.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of received bytes not yet decoded.
    #[must_use]
    pub fn len(&self) -> usize { self.bytes.len() }

    /// Whether every received byte has been decoded.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }

    /// Capacity of the memory currently held.
    #[must_use]
    pub fn capacity(&self) -> usize { self.bytes.capacity() }

    /// Total bytes consumed into frames since the buffer was created.
    #[must_use]
    pub const fn consumed(&self) -> u64 { self.consumed }

    /// Take ownership of `chunk`.
    ///
    /// When nothing is buffered the chunk becomes the buffer without copying
    /// if it is uniquely owned; otherwise its bytes are appended.
    pub(crate) fn append(&mut self, chunk: Bytes) {
        if self.bytes.is_empty() {
            self.bytes = chunk
                .try_into_mut()
                .unwrap_or_else(|shared| BytesMut::from(shared.as_ref()));
        } else {
            self.bytes.extend_from_slice(&chunk);
        }
    }

    /// Decode the next frame from the read cursor.
    pub(crate) fn decode(&mut self, codec: &FrameCodec) -> Result<Option<Frame>, ProtocolError> {
        let frame = codec.decode_frame(&mut self.bytes)?;
        if let Some(frame) = &frame {
            self.consumed += frame.frame_len() as u64;
            self.split_since_compact = true;
        }
        Ok(frame)
    }

    /// Drop the buffer's hold on memory that only backs consumed bytes.
    ///
    /// An empty buffer releases its allocation entirely. A remainder left
    /// behind by decoded frames is copied into a right-sized allocation so
    /// the buffer no longer pins the memory now owned by those frames.
    pub(crate) fn compact(&mut self) {
        if self.bytes.is_empty() {
            self.bytes = BytesMut::new();
        } else if self.split_since_compact {
            self.bytes = BytesMut::from(self.bytes.as_ref());
        }
        self.split_since_compact = false;
    }

    /// Hand every unconsumed byte to the caller, leaving the buffer empty.
    pub(crate) fn take_remaining(&mut self) -> Bytes { std::mem::take(&mut self.bytes).freeze() }

    /// Release all held memory, returning how many unconsumed bytes were
    /// discarded.
    pub(crate) fn release(&mut self) -> usize {
        let discarded = self.bytes.len();
        self.bytes = BytesMut::new();
        self.split_since_compact = false;
        discarded
    }
}

//! Error types for frame reassembly.

use bytes::Bytes;
use thiserror::Error;

use crate::codec::ProtocolError;

/// Misuse of a reassembler's subscription lifecycle.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// A consumer is already (or was previously) attached.
    #[error("frame sequence already has a subscriber")]
    AlreadySubscribed,

    /// Frames were requested before any consumer subscribed.
    #[error("frame sequence has no subscriber")]
    NotSubscribed,

    /// The consumer cancelled the sequence.
    #[error("frame sequence was cancelled")]
    Cancelled,

    /// A protocol error already terminated the sequence.
    #[error("frame sequence terminated by a protocol error")]
    Terminated,

    /// The reassembler was closed and its buffer released.
    #[error("reassembler is closed")]
    Closed,
}

/// A chunk the reassembler refused to accept.
///
/// Ownership of the chunk returns to the caller.
#[derive(Debug, Error)]
#[error("chunk of {} bytes rejected: {error}", .chunk.len())]
pub struct ChunkRejected {
    /// Why the chunk was refused.
    #[source]
    pub error: ReassemblyError,
    /// The untouched chunk.
    pub chunk: Bytes,
}

impl ChunkRejected {
    /// Take back the rejected chunk.
    #[must_use]
    pub fn into_chunk(self) -> Bytes { self.chunk }
}

/// A protocol violation that terminated a frame sequence.
///
/// `rejected` holds every byte from the offending offset onward, exactly as
/// received. The reassembler keeps no reference to it; the caller decides
/// its disposal.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ProtocolFailure {
    /// The violation detected by the codec.
    #[source]
    pub error: ProtocolError,
    /// Untrusted bytes handed back to the caller.
    pub rejected: Bytes,
}

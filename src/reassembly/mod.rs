//! Streaming reassembly of frames from arbitrarily chunked input.
//!
//! [`FrameReassembler`] owns one connection's [`ReassemblyBuffer`] and turns
//! each inbound chunk into a lazy, finite [`Frames`] sequence. The sequence is
//! pull-based: the consumer states its [`Demand`] and the reassembler decodes
//! no more frames than asked for, leaving the rest buffered for the next
//! [`pull`](FrameReassembler::pull).
//!
//! Buffer ownership follows three rules:
//!
//! - A chunk that yields no frame is kept inside the buffer until later chunks complete it.
//! - A chunk decoded into frames with no leftover is released before the sequence reports
//!   [`SequenceEnd::Drained`]; only the frames keep its memory alive.
//! - A chunk that triggers a protocol error is handed back to the caller inside
//!   [`ProtocolFailure`], and the reassembler refuses further input.
//!
//! ```
//! use bytes::Bytes;
//! use event_collector::{
//!     codec::FrameCodec,
//!     frame::Frame,
//!     reassembly::{Demand, FrameReassembler},
//! };
//!
//! let wire = FrameCodec::encode(&Frame::structured_event(vec![1_u8, 2]).expect("frame"));
//! let mut reassembler = FrameReassembler::new(FrameCodec::default());
//! reassembler.subscribe().expect("first subscriber");
//!
//! let (head, tail) = wire.split_at(5);
//! let first: Vec<_> = reassembler
//!     .on_chunk(Bytes::copy_from_slice(head), Demand::Unbounded)
//!     .expect("accepted")
//!     .collect();
//! assert!(first.is_empty());
//!
//! let second: Vec<_> = reassembler
//!     .on_chunk(Bytes::copy_from_slice(tail), Demand::Unbounded)
//!     .expect("accepted")
//!     .collect();
//! assert_eq!(second.len(), 1);
//! ```

use std::{iter::FusedIterator, num::NonZeroUsize};

use bytes::Bytes;

use crate::{codec::FrameCodec, frame::Frame};

mod buffer;
mod error;

pub use buffer::ReassemblyBuffer;
pub use error::{ChunkRejected, ProtocolFailure, ReassemblyError};

/// How many frames the consumer is ready to receive from one sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Demand {
    /// Emit every frame currently decodable.
    Unbounded,
    /// Emit at most this many frames, even if more are decodable.
    Bounded(NonZeroUsize),
}

impl Demand {
    fn limit(self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Bounded(n) => Some(n.get()),
        }
    }
}

/// Why a [`Frames`] sequence stopped yielding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceEnd {
    /// No complete frame is buffered. More may follow with the next chunk.
    Drained,
    /// The requested number of frames was emitted; more may be decodable.
    DemandSatisfied,
    /// A protocol error terminated the sequence.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Subscribed,
    Cancelled,
    Failed,
    Closed,
}

/// Stateful decoder turning one connection's byte stream into frames.
#[derive(Debug)]
pub struct FrameReassembler {
    codec: FrameCodec,
    buffer: ReassemblyBuffer,
    state: State,
}

impl FrameReassembler {
    /// Create a reassembler with an empty buffer and no subscriber.
    #[must_use]
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buffer: ReassemblyBuffer::new(),
            state: State::Idle,
        }
    }

    /// Create a reassembler whose single consumer is the caller.
    #[must_use]
    pub fn subscribed(codec: FrameCodec) -> Self {
        Self {
            state: State::Subscribed,
            ..Self::new(codec)
        }
    }

    /// Attach the single consumer of this reassembler's frames.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::AlreadySubscribed`] if a consumer has ever
    /// subscribed before, including one that later cancelled.
    pub fn subscribe(&mut self) -> Result<(), ReassemblyError> {
        match self.state {
            State::Idle => {
                self.state = State::Subscribed;
                Ok(())
            }
            State::Closed => Err(ReassemblyError::Closed),
            State::Subscribed | State::Cancelled | State::Failed => {
                Err(ReassemblyError::AlreadySubscribed)
            }
        }
    }

    /// Stop producing frames.
    ///
    /// Buffered bytes are kept until [`close`](Self::close) or drop.
    pub fn cancel(&mut self) {
        if self.state == State::Subscribed {
            self.state = State::Cancelled;
        }
    }

    /// Accept an inbound chunk and return the frames it makes decodable.
    ///
    /// # Errors
    ///
    /// Returns the chunk inside [`ChunkRejected`] if there is no active
    /// subscriber or the sequence has already terminated.
    pub fn on_chunk(&mut self, chunk: Bytes, demand: Demand) -> Result<Frames<'_>, ChunkRejected> {
        if let Err(error) = self.ensure_active() {
            return Err(ChunkRejected { error, chunk });
        }
        self.buffer.append(chunk);
        Ok(self.frames(demand))
    }

    /// Request more frames from already-buffered bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`ReassemblyError`] if there is no active subscriber or the
    /// sequence has already terminated.
    pub fn pull(&mut self, demand: Demand) -> Result<Frames<'_>, ReassemblyError> {
        self.ensure_active()?;
        Ok(self.frames(demand))
    }

    /// Tear down the reassembler, releasing all buffered memory.
    ///
    /// Returns the number of received bytes that never formed a frame.
    pub fn close(&mut self) -> usize {
        self.state = State::Closed;
        self.buffer.release()
    }

    /// Borrow the underlying buffer.
    #[must_use]
    pub const fn buffer(&self) -> &ReassemblyBuffer { &self.buffer }

    /// Number of buffered bytes awaiting decode.
    #[must_use]
    pub fn buffered_len(&self) -> usize { self.buffer.len() }

    /// Whether a protocol error has terminated this reassembler.
    #[must_use]
    pub fn is_failed(&self) -> bool { self.state == State::Failed }

    fn ensure_active(&self) -> Result<(), ReassemblyError> {
        match self.state {
            State::Subscribed => Ok(()),
            State::Idle => Err(ReassemblyError::NotSubscribed),
            State::Cancelled => Err(ReassemblyError::Cancelled),
            State::Failed => Err(ReassemblyError::Terminated),
            State::Closed => Err(ReassemblyError::Closed),
        }
    }

    fn frames(&mut self, demand: Demand) -> Frames<'_> {
        Frames {
            reassembler: self,
            remaining: demand.limit(),
            end: None,
        }
    }

    fn decode_next(&mut self) -> Result<Option<Frame>, ProtocolFailure> {
        self.buffer.decode(&self.codec).map_err(|error| {
            self.state = State::Failed;
            ProtocolFailure {
                error,
                rejected: self.buffer.take_remaining(),
            }
        })
    }
}

/// Lazy, finite sequence of frames decoded from buffered input.
///
/// Each call to [`next`](Iterator::next) decodes at most one frame. The
/// sequence ends when the buffer holds no complete frame, when the demand is
/// met, or after yielding a [`ProtocolFailure`]; [`end`](Self::end) reports
/// which.
#[derive(Debug)]
pub struct Frames<'a> {
    reassembler: &'a mut FrameReassembler,
    remaining: Option<usize>,
    end: Option<SequenceEnd>,
}

impl Frames<'_> {
    /// Why the sequence stopped, or `None` while it may still yield.
    #[must_use]
    pub const fn end(&self) -> Option<SequenceEnd> { self.end }
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, ProtocolFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }
        if self.remaining == Some(0) {
            self.end = Some(SequenceEnd::DemandSatisfied);
            return None;
        }
        match self.reassembler.decode_next() {
            Ok(Some(frame)) => {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                Some(Ok(frame))
            }
            Ok(None) => {
                self.reassembler.buffer.compact();
                self.end = Some(SequenceEnd::Drained);
                None
            }
            Err(failure) => {
                self.end = Some(SequenceEnd::Failed);
                Some(Err(failure))
            }
        }
    }
}

impl FusedIterator for Frames<'_> {}

#[cfg(test)]
mod tests;

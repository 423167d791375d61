//! Per-connection decode, validate and route pipeline.
//!
//! A [`Pipeline`] owns one connection's [`FrameReassembler`] and pushes every
//! frame it yields through header extraction, validation and routing, in
//! arrival order. Message-level failures are absorbed here: the frame is
//! dropped, its memory released and a drop metric recorded. Only a protocol
//! violation ends a batch early, reported as [`BatchEnd::Rejected`] so the
//! connection layer can flush what was already routed and close.

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;

use crate::{
    codec::FrameCodec,
    frame::Frame,
    message::{HeaderExtractor, MessageValidator, RoutedMessage},
    metrics::{ClientRejectionCause, MessageDropCause, Metrics},
    reassembly::{
        Demand,
        FrameReassembler,
        Frames,
        ProtocolFailure,
        ReassemblyError,
        SequenceEnd,
    },
    routing::Router,
};

/// Why a batch stopped.
#[derive(Debug)]
pub enum BatchEnd {
    /// Every complete frame was processed; wait for more bytes.
    Drained,
    /// The demand was met; more frames may be ready for the next pull.
    DemandSatisfied,
    /// The client violated the wire protocol. The connection must close.
    Rejected(ProtocolFailure),
    /// The pipeline no longer accepts input.
    Stopped(ReassemblyError),
}

/// Routed messages produced by one step of the pipeline.
#[derive(Debug)]
pub struct Batch {
    /// Messages ready for the sink, in wire order.
    pub messages: Vec<RoutedMessage>,
    /// Why the batch ended.
    pub end: BatchEnd,
}

impl Batch {
    /// Whether the connection must be closed after flushing this batch.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.end, BatchEnd::Rejected(_) | BatchEnd::Stopped(_))
    }
}

/// Decode-to-route pipeline for a single connection.
pub struct Pipeline {
    reassembler: FrameReassembler,
    extractor: HeaderExtractor,
    validator: MessageValidator,
    router: Arc<Router>,
    metrics: Arc<dyn Metrics>,
    peer: Option<SocketAddr>,
}

impl Pipeline {
    /// Create a pipeline subscribed to a fresh reassembler.
    #[must_use]
    pub fn new(codec: FrameCodec, router: Arc<Router>, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            reassembler: FrameReassembler::subscribed(codec),
            extractor: HeaderExtractor,
            validator: MessageValidator,
            router,
            metrics,
            peer: None,
        }
    }

    /// Attach the client address used in log events.
    #[must_use]
    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    /// Feed an inbound chunk and route up to `demand` of the frames it
    /// completes.
    pub fn on_chunk(&mut self, chunk: Bytes, demand: Demand) -> Batch {
        self.metrics.notify_bytes_received(chunk.len());
        match self.reassembler.on_chunk(chunk, demand) {
            Ok(frames) => Stages {
                extractor: &self.extractor,
                validator: &self.validator,
                router: &self.router,
                metrics: self.metrics.as_ref(),
                peer: self.peer,
            }
            .run(frames),
            Err(rejected) => {
                tracing::debug!(
                    peer = ?self.peer,
                    size = rejected.chunk.len(),
                    error = %rejected.error,
                    "discarding chunk received after pipeline stopped"
                );
                Batch {
                    messages: Vec::new(),
                    end: BatchEnd::Stopped(rejected.error),
                }
            }
        }
    }

    /// Route up to `demand` further frames from bytes already buffered.
    pub fn pull(&mut self, demand: Demand) -> Batch {
        match self.reassembler.pull(demand) {
            Ok(frames) => Stages {
                extractor: &self.extractor,
                validator: &self.validator,
                router: &self.router,
                metrics: self.metrics.as_ref(),
                peer: self.peer,
            }
            .run(frames),
            Err(error) => Batch {
                messages: Vec::new(),
                end: BatchEnd::Stopped(error),
            },
        }
    }

    /// Stop producing messages. Buffered bytes are kept until [`close`](Self::close).
    pub fn cancel(&mut self) { self.reassembler.cancel(); }

    /// Release the connection's buffer, returning how many received bytes
    /// never formed a complete frame.
    pub fn close(&mut self) -> usize { self.reassembler.close() }

    /// Bytes buffered but not yet decoded.
    #[must_use]
    pub fn buffered_len(&self) -> usize { self.reassembler.buffered_len() }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("reassembler", &self.reassembler)
            .field("router", &self.router)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Borrowed view of the stateless stages, split from the reassembler so a
/// frame sequence can be consumed while they are in use.
struct Stages<'a> {
    extractor: &'a HeaderExtractor,
    validator: &'a MessageValidator,
    router: &'a Router,
    metrics: &'a dyn Metrics,
    peer: Option<SocketAddr>,
}

impl Stages<'_> {
    fn run(&self, mut frames: Frames<'_>) -> Batch {
        let mut messages = Vec::new();
        for item in frames.by_ref() {
            match item {
                Ok(frame) => {
                    self.metrics.notify_frame_received(frame.payload().len());
                    match self.process(frame) {
                        Ok(routed) => messages.push(routed),
                        Err(cause) => self.metrics.notify_message_dropped(cause),
                    }
                }
                Err(failure) => {
                    let cause = ClientRejectionCause::from(&failure.error);
                    tracing::warn!(
                        peer = ?self.peer,
                        error = %failure.error,
                        rejected_bytes = failure.rejected.len(),
                        "closing connection: {cause}"
                    );
                    self.metrics.notify_client_rejected(cause);
                    return Batch {
                        messages,
                        end: BatchEnd::Rejected(failure),
                    };
                }
            }
        }
        let end = match frames.end() {
            Some(SequenceEnd::DemandSatisfied) => BatchEnd::DemandSatisfied,
            _ => BatchEnd::Drained,
        };
        Batch { messages, end }
    }

    fn process(&self, frame: Frame) -> Result<RoutedMessage, MessageDropCause> {
        let header = match self.extractor.extract(frame.payload()) {
            Ok(header) => header,
            Err(error) => {
                tracing::debug!(peer = ?self.peer, %error, "dropping frame: invalid payload");
                return Err(MessageDropCause::InvalidMessage);
            }
        };

        let message = self.validator.validate(frame, header).map_err(|missing| {
            let missing: Vec<_> = missing.iter().map(|field| field.as_str()).collect();
            tracing::debug!(
                peer = ?self.peer,
                ?missing,
                "dropping message: missing mandatory fields"
            );
            MessageDropCause::InvalidMessage
        })?;
        self.metrics.notify_message_ready_for_routing();

        self.router.route_message(message).map_err(|message| {
            tracing::debug!(
                peer = ?self.peer,
                domain = ?message.domain(),
                "dropping message: route not found"
            );
            MessageDropCause::RouteNotFound
        })
    }
}


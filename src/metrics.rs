//! Metric reporting for the collector.
//!
//! The pipeline reports through the [`Metrics`] trait so the backend is
//! chosen once at startup. [`RecorderMetrics`] forwards to the
//! [`metrics`](https://docs.rs/metrics) facade, whose installed recorder
//! updates counters atomically across connections. [`NoopMetrics`] discards
//! everything.

use std::fmt;

use crate::codec::ProtocolError;

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "collector_connections_active";
/// Name of the counter tracking raw bytes read from clients.
pub const BYTES_RECEIVED: &str = "collector_bytes_received_total";
/// Name of the counter tracking decoded frames.
pub const FRAMES_RECEIVED: &str = "collector_frames_received_total";
/// Name of the histogram tracking decoded frame payload sizes.
pub const FRAME_PAYLOAD_BYTES: &str = "collector_frame_payload_bytes";
/// Name of the counter tracking validated messages.
pub const MESSAGES_READY: &str = "collector_messages_ready_total";
/// Name of the counter tracking messages accepted by the sink.
pub const MESSAGES_SENT: &str = "collector_messages_sent_total";
/// Name of the counter tracking dropped messages.
pub const MESSAGES_DROPPED: &str = "collector_messages_dropped_total";
/// Name of the counter tracking rejected clients.
pub const CLIENTS_REJECTED: &str = "collector_clients_rejected_total";

/// Why a single message was dropped while its connection stayed open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageDropCause {
    /// The payload could not be decoded or lacked mandatory fields.
    InvalidMessage,
    /// No route matches the message's domain.
    RouteNotFound,
    /// The sink reported a delivery failure.
    DeliveryFailed,
}

impl MessageDropCause {
    /// Label value used in metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMessage => "invalid message",
            Self::RouteNotFound => "route not found",
            Self::DeliveryFailed => "delivery failed",
        }
    }
}

impl fmt::Display for MessageDropCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Why a client connection was terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientRejectionCause {
    InvalidMarker,
    UnsupportedVersion,
    UnsupportedPayloadType,
    PayloadTooLarge,
    PayloadSizeMismatch,
}

impl ClientRejectionCause {
    /// Label value used in metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMarker => "invalid wire frame marker",
            Self::UnsupportedVersion => "unsupported protocol version",
            Self::UnsupportedPayloadType => "unsupported payload type",
            Self::PayloadTooLarge => "payload size exceeded",
            Self::PayloadSizeMismatch => "payload size mismatch",
        }
    }
}

impl From<&ProtocolError> for ClientRejectionCause {
    fn from(error: &ProtocolError) -> Self {
        match error {
            ProtocolError::InvalidMarker { .. } => Self::InvalidMarker,
            ProtocolError::UnsupportedVersion { .. } => Self::UnsupportedVersion,
            ProtocolError::UnsupportedPayloadType { .. } => Self::UnsupportedPayloadType,
            ProtocolError::PayloadTooLarge { .. } => Self::PayloadTooLarge,
            ProtocolError::PayloadSizeMismatch { .. } => Self::PayloadSizeMismatch,
        }
    }
}

impl fmt::Display for ClientRejectionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Sink for pipeline metric events.
///
/// Implementations must be cheap and infallible: they are called inline on
/// every connection's hot path and must never block.
pub trait Metrics: Send + Sync {
    /// Raw bytes were read from a client.
    fn notify_bytes_received(&self, size: usize);
    /// A complete frame with a payload of `payload_size` bytes was decoded.
    fn notify_frame_received(&self, payload_size: usize);
    /// A message passed validation.
    fn notify_message_ready_for_routing(&self);
    /// The sink accepted a message for `topic`.
    fn notify_message_sent(&self, topic: &str);
    /// A message was dropped.
    fn notify_message_dropped(&self, cause: MessageDropCause);
    /// A client connection was terminated.
    fn notify_client_rejected(&self, cause: ClientRejectionCause);
}

/// Metrics backend that records nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn notify_bytes_received(&self, _size: usize) {}

    fn notify_frame_received(&self, _payload_size: usize) {}

    fn notify_message_ready_for_routing(&self) {}

    fn notify_message_sent(&self, _topic: &str) {}

    fn notify_message_dropped(&self, _cause: MessageDropCause) {}

    fn notify_client_rejected(&self, _cause: ClientRejectionCause) {}
}

#[cfg(feature = "metrics")]
pub use recorder::RecorderMetrics;

#[cfg(feature = "metrics")]
mod recorder {
    use metrics::{counter, histogram};

    use super::*;

    /// Metrics backend forwarding to the globally installed `metrics`
    /// recorder.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct RecorderMetrics;

    impl Metrics for RecorderMetrics {
        fn notify_bytes_received(&self, size: usize) {
            counter!(BYTES_RECEIVED).increment(size as u64);
        }

        #[expect(
            clippy::cast_precision_loss,
            reason = "payload sizes are bounded well below f64 precision"
        )]
        fn notify_frame_received(&self, payload_size: usize) {
            counter!(FRAMES_RECEIVED).increment(1);
            histogram!(FRAME_PAYLOAD_BYTES).record(payload_size as f64);
        }

        fn notify_message_ready_for_routing(&self) { counter!(MESSAGES_READY).increment(1); }

        fn notify_message_sent(&self, topic: &str) {
            counter!(MESSAGES_SENT, "topic" => topic.to_owned()).increment(1);
        }

        fn notify_message_dropped(&self, cause: MessageDropCause) {
            counter!(MESSAGES_DROPPED, "cause" => cause.as_str()).increment(1);
        }

        fn notify_client_rejected(&self, cause: ClientRejectionCause) {
            counter!(CLIENTS_REJECTED, "cause" => cause.as_str()).increment(1);
        }
    }
}

/// Increment the active connections gauge.
#[cfg(feature = "metrics")]
pub fn inc_connections() { metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0); }

/// Decrement the active connections gauge.
#[cfg(feature = "metrics")]
pub fn dec_connections() { metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0); }

/// Increment the active connections gauge.
#[cfg(not(feature = "metrics"))]
pub fn inc_connections() {}

/// Decrement the active connections gauge.
#[cfg(not(feature = "metrics"))]
pub fn dec_connections() {}

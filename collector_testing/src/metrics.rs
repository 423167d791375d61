//! In-memory [`Metrics`] backend for assertions.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use event_collector::metrics::{ClientRejectionCause, MessageDropCause, Metrics};
use rstest::fixture;

/// Fresh shared [`RecordingMetrics`] for a test.
#[fixture]
pub fn recording_metrics() -> Arc<RecordingMetrics> { Arc::new(RecordingMetrics::new()) }

/// Counts every metric notification.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    bytes_received: AtomicU64,
    frames_received: AtomicU64,
    ready_for_routing: AtomicU64,
    sent: Mutex<HashMap<String, u64>>,
    dropped: Mutex<HashMap<MessageDropCause, u64>>,
    rejected: Mutex<HashMap<ClientRejectionCause, u64>>,
}

impl RecordingMetrics {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Total bytes reported as received.
    #[must_use]
    pub fn bytes_received(&self) -> u64 { self.bytes_received.load(Ordering::SeqCst) }

    /// Number of decoded frames reported.
    #[must_use]
    pub fn frames_received(&self) -> u64 { self.frames_received.load(Ordering::SeqCst) }

    /// Number of messages that passed validation.
    #[must_use]
    pub fn ready_for_routing(&self) -> u64 { self.ready_for_routing.load(Ordering::SeqCst) }

    /// Messages reported sent to `topic`.
    #[must_use]
    pub fn sent(&self, topic: &str) -> u64 {
        self.sent
            .lock()
            .expect("metrics lock poisoned")
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Messages dropped for `cause`.
    #[must_use]
    pub fn dropped(&self, cause: MessageDropCause) -> u64 {
        self.dropped
            .lock()
            .expect("metrics lock poisoned")
            .get(&cause)
            .copied()
            .unwrap_or(0)
    }

    /// Clients rejected for `cause`.
    #[must_use]
    pub fn rejected(&self, cause: ClientRejectionCause) -> u64 {
        self.rejected
            .lock()
            .expect("metrics lock poisoned")
            .get(&cause)
            .copied()
            .unwrap_or(0)
    }
}

impl Metrics for RecordingMetrics {
    fn notify_bytes_received(&self, size: usize) {
        self.bytes_received.fetch_add(size as u64, Ordering::SeqCst);
    }

    fn notify_frame_received(&self, _payload_size: usize) {
        self.frames_received.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_message_ready_for_routing(&self) {
        self.ready_for_routing.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_message_sent(&self, topic: &str) {
        *self
            .sent
            .lock()
            .expect("metrics lock poisoned")
            .entry(topic.to_owned())
            .or_default() += 1;
    }

    fn notify_message_dropped(&self, cause: MessageDropCause) {
        *self
            .dropped
            .lock()
            .expect("metrics lock poisoned")
            .entry(cause)
            .or_default() += 1;
    }

    fn notify_client_rejected(&self, cause: ClientRejectionCause) {
        *self
            .rejected
            .lock()
            .expect("metrics lock poisoned")
            .entry(cause)
            .or_default() += 1;
    }
}

//! Per-connection driver for [`CollectorServer`](super::CollectorServer).
//!
//! Each accepted socket is read in chunks and fed to its own [`Pipeline`].
//! Routed messages travel over a bounded channel into the configured
//! [`Sink`]; waiting for channel capacity is what slows a fast client down.
//! A companion task drains the sink's outcome stream into metrics.

use std::{
    any::Any,
    fmt,
    io,
    net::SocketAddr,
    num::NonZeroUsize,
    sync::Arc,
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures::{FutureExt, StreamExt, stream};
use log::{error, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpStream,
    select,
    sync::{mpsc, watch},
    task::JoinError,
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    codec::{FrameCodec, ProtocolError},
    config::CollectorConfig,
    message::RoutedMessage,
    metrics::{self, MessageDropCause, Metrics},
    pipeline::{Batch, BatchEnd, Pipeline},
    reassembly::Demand,
    routing::Router,
    sink::{DeliveryReport, Sink, account_outcomes},
};

/// Tunables applied to every connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Codec enforcing the payload limit.
    pub codec: FrameCodec,
    /// Frames routed per pull.
    pub batch_size: NonZeroUsize,
    /// Capacity reserved for each socket read.
    pub read_buffer_size: usize,
    /// Close connections that send nothing for this long.
    pub idle_timeout: Option<Duration>,
    /// Routed messages buffered ahead of the sink.
    pub sink_capacity: NonZeroUsize,
    /// Grace period for the sink to settle outstanding messages on shutdown.
    pub drain_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self { Self::from_config(&CollectorConfig::default()) }
}

impl ConnectionSettings {
    /// Derive settings from a loaded configuration.
    ///
    /// Zero sizes are raised to one; [`CollectorConfig::validate`] rejects
    /// them earlier.
    #[must_use]
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            codec: config.codec(),
            batch_size: NonZeroUsize::new(config.collector.batch_size).unwrap_or(NonZeroUsize::MIN),
            read_buffer_size: config.server.read_buffer_size.max(1),
            idle_timeout: config.idle_timeout(),
            sink_capacity: NonZeroUsize::new(config.collector.sink_capacity)
                .unwrap_or(NonZeroUsize::MIN),
            drain_timeout: config.drain_timeout(),
        }
    }
}

/// Shared state handed to every connection.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Routing table shared by all connections.
    pub router: Arc<Router>,
    /// Metrics backend.
    pub metrics: Arc<dyn Metrics>,
    /// Destination for routed messages.
    pub sink: Arc<dyn Sink>,
    /// Per-connection tunables.
    pub settings: ConnectionSettings,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("router", &self.router)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Why a connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed its side of the stream.
    Eof,
    /// No bytes arrived within the idle timeout.
    IdleTimeout,
    /// The server is shutting down.
    Shutdown,
    /// The client violated the wire protocol.
    ProtocolViolation(ProtocolError),
    /// Reading from the socket failed.
    ReadFailed(io::ErrorKind),
    /// The sink stopped accepting messages.
    SinkClosed,
}

/// Totals for one finished connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Bytes read from the client.
    pub bytes_received: u64,
    /// Messages handed to the sink.
    pub messages_routed: u64,
    /// Sink outcomes for those messages.
    pub delivery: DeliveryReport,
    /// Buffered bytes that never formed a complete frame.
    pub unconsumed_bytes: usize,
    /// Why the connection ended.
    pub close_reason: CloseReason,
}

enum ReadOutcome {
    Data,
    Eof,
    Idle,
    Cancelled,
    Failed(io::Error),
}

/// Drive one client stream until it ends, routing every valid message into
/// the context's sink.
///
/// Returns once the stream reaches EOF, goes idle, fails, violates the wire
/// protocol or `shutdown` is cancelled, and every routed message has an
/// outcome from the sink.
pub async fn handle_connection<R>(
    mut reader: R,
    peer: Option<SocketAddr>,
    context: &ConnectionContext,
    shutdown: &CancellationToken,
) -> ConnectionSummary
where
    R: AsyncRead + Unpin,
{
    let settings = context.settings;
    let (tx, rx) = mpsc::channel::<RoutedMessage>(settings.sink_capacity.get());
    let messages = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|message| (message, rx))
    })
    .boxed();
    let (progress_tx, progress) = watch::channel(DeliveryReport::default());
    let outcomes = context
        .sink
        .send(messages)
        .inspect(move |outcome| progress_tx.send_modify(|report| report.record(outcome)))
        .boxed();
    let mut accounting = tokio::spawn(account_outcomes(outcomes, Arc::clone(&context.metrics)));

    let mut pipeline = Pipeline::new(
        settings.codec,
        Arc::clone(&context.router),
        Arc::clone(&context.metrics),
    )
    .with_peer(peer);
    let demand = Demand::Bounded(settings.batch_size);
    let mut buf = BytesMut::with_capacity(settings.read_buffer_size);
    let mut bytes_received = 0_u64;
    let mut messages_routed = 0_u64;

    tracing::info!(?peer, "connection opened");

    let close_reason = 'connection: loop {
        buf.reserve(settings.read_buffer_size);
        let read = select! {
            biased;

            () = shutdown.cancelled() => ReadOutcome::Cancelled,
            outcome = read_chunk(&mut reader, &mut buf, settings.idle_timeout) => outcome,
        };
        match read {
            ReadOutcome::Cancelled => break CloseReason::Shutdown,
            ReadOutcome::Data => {}
            ReadOutcome::Eof => break CloseReason::Eof,
            ReadOutcome::Idle => break CloseReason::IdleTimeout,
            ReadOutcome::Failed(e) => {
                tracing::warn!(?peer, error = %e, "read failed");
                break CloseReason::ReadFailed(e.kind());
            }
        }

        let chunk = take_chunk(&mut buf, settings.read_buffer_size);
        bytes_received += chunk.len() as u64;
        let mut batch = pipeline.on_chunk(chunk, demand);
        loop {
            let Batch { messages, end } = batch;
            let forwarded = forward_batch(&tx, messages, shutdown, context.metrics.as_ref()).await;
            messages_routed += forwarded.handed_over;
            if let Some(reason) = forwarded.stopped {
                tracing::warn!(?peer, ?reason, "routed messages left undelivered");
                break 'connection reason;
            }
            match end {
                BatchEnd::Drained => break,
                BatchEnd::DemandSatisfied => batch = pipeline.pull(demand),
                BatchEnd::Rejected(failure) => {
                    break 'connection CloseReason::ProtocolViolation(failure.error);
                }
                BatchEnd::Stopped(e) => {
                    tracing::debug!(?peer, error = %e, "pipeline stopped");
                    break 'connection CloseReason::Shutdown;
                }
            }
        }
    };

    if close_reason == CloseReason::Shutdown {
        pipeline.cancel();
    }
    drop(tx);
    let settled = select! {
        biased;

        joined = &mut accounting => Some(joined),
        () = shutdown.cancelled() => None,
    };
    let delivery = match settled {
        Some(joined) => joined_report(joined, peer),
        None => match timeout(settings.drain_timeout, &mut accounting).await {
            Ok(joined) => joined_report(joined, peer),
            Err(_) => {
                accounting.abort();
                let mut report = *progress.borrow();
                let unsettled = messages_routed.saturating_sub(report.sent + report.failed);
                tracing::warn!(
                    ?peer,
                    unsettled,
                    "sink did not settle routed messages before shutdown"
                );
                record_undelivered(context.metrics.as_ref(), unsettled);
                report.failed += unsettled;
                report
            }
        },
    };
    let unconsumed_bytes = pipeline.close();
    if unconsumed_bytes > 0 {
        tracing::info!(
            ?peer,
            unconsumed_bytes,
            "connection closed with an incomplete frame buffered"
        );
    }
    tracing::info!(
        ?peer,
        reason = ?close_reason,
        bytes_received,
        messages_routed,
        sent = delivery.sent,
        failed = delivery.failed,
        "connection closed"
    );

    ConnectionSummary {
        bytes_received,
        messages_routed,
        delivery,
        unconsumed_bytes,
        close_reason,
    }
}

fn joined_report(
    joined: Result<DeliveryReport, JoinError>,
    peer: Option<SocketAddr>,
) -> DeliveryReport {
    joined.unwrap_or_else(|e| {
        tracing::error!(?peer, error = %e, "outcome accounting task failed");
        DeliveryReport::default()
    })
}

/// Detach the bytes read so far, leaving `buf` with a fresh allocation.
///
/// The returned chunk owns its allocation outright, so the reassembler can
/// adopt it without copying.
fn take_chunk(buf: &mut BytesMut, capacity: usize) -> Bytes {
    std::mem::replace(buf, BytesMut::with_capacity(capacity)).freeze()
}

struct Forwarded {
    handed_over: u64,
    stopped: Option<CloseReason>,
}

/// Hand `messages` to the sink channel in order.
///
/// Waiting for capacity yields to `shutdown`. Messages that never reach the
/// channel are counted as delivery failures.
async fn forward_batch(
    tx: &mpsc::Sender<RoutedMessage>,
    messages: Vec<RoutedMessage>,
    shutdown: &CancellationToken,
    metrics: &dyn Metrics,
) -> Forwarded {
    let total = messages.len() as u64;
    let mut handed_over = 0_u64;
    for message in messages {
        let permit = select! {
            biased;

            permit = tx.reserve() => permit.map_err(|_| CloseReason::SinkClosed),
            () = shutdown.cancelled() => Err(CloseReason::Shutdown),
        };
        match permit {
            Ok(permit) => {
                permit.send(message);
                handed_over += 1;
            }
            Err(reason) => {
                record_undelivered(metrics, total - handed_over);
                return Forwarded {
                    handed_over,
                    stopped: Some(reason),
                };
            }
        }
    }
    Forwarded {
        handed_over,
        stopped: None,
    }
}

fn record_undelivered(metrics: &dyn Metrics, count: u64) {
    for _ in 0..count {
        metrics.notify_message_dropped(MessageDropCause::DeliveryFailed);
    }
}

async fn read_chunk<R>(reader: &mut R, buf: &mut BytesMut, idle: Option<Duration>) -> ReadOutcome
where
    R: AsyncRead + Unpin,
{
    let read = match idle {
        Some(limit) => match timeout(limit, reader.read_buf(buf)).await {
            Ok(result) => result,
            Err(_) => return ReadOutcome::Idle,
        },
        None => reader.read_buf(buf).await,
    };
    match read {
        Ok(0) => ReadOutcome::Eof,
        Ok(_) => ReadOutcome::Data,
        Err(e) => ReadOutcome::Failed(e),
    }
}

/// Spawn a task to process a single TCP connection, logging and discarding
/// any panics.
pub(super) fn spawn_connection_task(
    stream: TcpStream,
    context: ConnectionContext,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!("failed to retrieve peer address: error={e}");
            None
        }
    };
    tracker.spawn(async move {
        metrics::inc_connections();
        let fut = std::panic::AssertUnwindSafe(handle_connection(
            stream,
            peer_addr,
            &context,
            &shutdown,
        ))
        .catch_unwind();

        if let Err(panic) = fut.await {
            let panic_msg = PanicMessage(panic);
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
            tracing::error!(panic = %panic_msg, ?peer_addr, "connection task panicked");
        }
        metrics::dec_connections();
    });
}

/// Displayable panic payload.
struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, sync::Arc};

    use bytes::Bytes;
    use futures::StreamExt;
    use rstest::{fixture, rstest};
    use tokio::io::AsyncWriteExt;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        frame::Frame,
        message::{CommonEventHeader, Event},
        metrics::NoopMetrics,
        routing::Route,
        sink::{MessageStream, OutcomeStream, SinkOutcome},
    };

    #[derive(Default)]
    struct Collect(std::sync::Mutex<Vec<String>>);

    struct SharedSink(Arc<Collect>);

    impl Sink for SharedSink {
        fn send(&self, messages: MessageStream) -> OutcomeStream {
            let seen = Arc::clone(&self.0);
            messages
                .map(move |message| {
                    seen.0
                        .lock()
                        .expect("lock")
                        .push(message.target_topic.clone());
                    SinkOutcome::Consumed(message)
                })
                .boxed()
        }
    }

    struct PanicSink;

    impl Sink for PanicSink {
        fn send(&self, _messages: MessageStream) -> OutcomeStream { panic!("sink exploded") }
    }

    fn wire(domain: &str) -> Bytes {
        let header = CommonEventHeader {
            version: Some("4.0".into()),
            domain: Some(domain.into()),
            sequence: Some(0),
            event_id: Some("id".into()),
            event_name: Some("name".into()),
            start_epoch_microsec: Some(1),
            last_epoch_microsec: Some(2),
            reporting_entity_name: Some("re".into()),
            source_name: Some("src".into()),
            ..CommonEventHeader::default()
        };
        let payload = Event {
            common_event_header: Some(header),
            event_fields: Bytes::new(),
        }
        .to_payload();
        FrameCodec::encode(&Frame::structured_event(payload).expect("frame"))
    }

    fn context_with(sink: Arc<dyn Sink>, batch_size: usize) -> ConnectionContext {
        ConnectionContext {
            router: Arc::new(Router::new([Route::new("perf3gpp", "PERF")])),
            metrics: Arc::new(NoopMetrics),
            sink,
            settings: ConnectionSettings {
                batch_size: NonZeroUsize::new(batch_size).expect("non-zero"),
                sink_capacity: NonZeroUsize::MIN,
                idle_timeout: None,
                ..ConnectionSettings::default()
            },
        }
    }

    #[fixture]
    fn collected() -> Arc<Collect> { Arc::new(Collect::default()) }

    #[rstest]
    #[case(1)]
    #[case(64)]
    #[tokio::test]
    async fn routes_every_frame_before_eof(collected: Arc<Collect>, #[case] batch_size: usize) {
        let context = context_with(Arc::new(SharedSink(Arc::clone(&collected))), batch_size);
        let (mut client, server) = tokio::io::duplex(64);
        let mut bytes = Vec::new();
        for domain in ["perf3gpp", "unknown", "perf3gpp", "perf3gpp"] {
            bytes.extend_from_slice(&wire(domain));
        }
        let expected_len = bytes.len() as u64;

        let writer = tokio::spawn(async move {
            client.write_all(&bytes).await.expect("write");
            client.shutdown().await.expect("shutdown");
        });
        let summary = handle_connection(server, None, &context, &CancellationToken::new()).await;
        writer.await.expect("writer");

        assert_eq!(summary.close_reason, CloseReason::Eof);
        assert_eq!(summary.bytes_received, expected_len);
        assert_eq!(summary.messages_routed, 3);
        assert_eq!(summary.delivery.sent, 3);
        assert_eq!(summary.unconsumed_bytes, 0);
        assert_eq!(collected.0.lock().expect("lock").len(), 3);
    }

    #[rstest]
    #[tokio::test]
    async fn protocol_violation_closes_after_flushing(collected: Arc<Collect>) {
        let context = context_with(Arc::new(SharedSink(Arc::clone(&collected))), 8);
        let (mut client, server) = tokio::io::duplex(1024);
        let mut bytes = wire("perf3gpp").to_vec();
        bytes.extend_from_slice(&[0x00, 0x01, 0x02]);
        client.write_all(&bytes).await.expect("write");

        let summary = handle_connection(server, None, &context, &CancellationToken::new()).await;

        assert_eq!(
            summary.close_reason,
            CloseReason::ProtocolViolation(ProtocolError::InvalidMarker { found: 0x00 })
        );
        assert_eq!(summary.delivery.sent, 1);
        assert_eq!(collected.0.lock().expect("lock").as_slice(), ["PERF"]);
    }

    #[rstest]
    #[tokio::test]
    async fn partial_frame_at_eof_is_reported(collected: Arc<Collect>) {
        let context = context_with(Arc::new(SharedSink(collected)), 8);
        let (mut client, server) = tokio::io::duplex(1024);
        let frame = wire("perf3gpp");
        client.write_all(&frame[..frame.len() - 1]).await.expect("write");
        drop(client);

        let summary = handle_connection(server, None, &context, &CancellationToken::new()).await;

        assert_eq!(summary.close_reason, CloseReason::Eof);
        assert_eq!(summary.unconsumed_bytes, frame.len() - 1);
        assert_eq!(summary.messages_routed, 0);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn idle_connections_time_out(collected: Arc<Collect>) {
        let mut context = context_with(Arc::new(SharedSink(collected)), 8);
        context.settings.idle_timeout = Some(Duration::from_secs(5));
        let (_client, server) = tokio::io::duplex(64);

        let summary = handle_connection(server, None, &context, &CancellationToken::new()).await;

        assert_eq!(summary.close_reason, CloseReason::IdleTimeout);
    }

    #[rstest]
    #[tokio::test]
    async fn shutdown_cancels_open_connections(collected: Arc<Collect>) {
        let context = context_with(Arc::new(SharedSink(collected)), 8);
        let (_client, server) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        token.cancel();

        let summary = handle_connection(server, None, &context, &token).await;

        assert_eq!(summary.close_reason, CloseReason::Shutdown);
    }

    #[test]
    fn taken_chunks_own_their_allocation() {
        let mut buf = BytesMut::with_capacity(16);
        buf.extend_from_slice(b"abc");

        let chunk = take_chunk(&mut buf, 16);

        assert!(buf.is_empty());
        assert!(buf.capacity() >= 16);
        let owned = chunk.try_into_mut().expect("chunk is uniquely owned");
        assert_eq!(&owned[..], b"abc");
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn connection_panic_is_logged_and_contained() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let tracker = TaskTracker::new();
        let context = context_with(Arc::new(PanicSink), 8);

        let driver = tokio::spawn({
            let tracker = tracker.clone();
            async move {
                let (stream, _) = listener.accept().await.expect("accept");
                spawn_connection_task(stream, context, CancellationToken::new(), &tracker);
                tracker.close();
                tracker.wait().await;
            }
        });

        let client = tokio::net::TcpStream::connect(addr).await.expect("connect");
        driver.await.expect("join connection task driver");
        drop(client);

        logs_assert(|lines: &[&str]| {
            lines
                .iter()
                .find(|line| {
                    line.contains("connection task panicked") && line.contains("sink exploded")
                })
                .map(|_| ())
                .ok_or_else(|| "panic log not found".to_string())
        });
    }
}

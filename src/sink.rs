//! Interface to the downstream message bus.
//!
//! A [`Sink`] receives the stream of [`RoutedMessage`]s produced by one
//! connection and returns a stream reporting, per message, whether it was
//! consumed or failed. Whether delivery is synchronous, batched or retried is
//! entirely up to the implementation. Outcomes are folded into metrics by
//! [`account_outcomes`].

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use thiserror::Error;

use crate::{
    message::RoutedMessage,
    metrics::{MessageDropCause, Metrics},
};

/// Stream of messages handed to a sink.
pub type MessageStream = BoxStream<'static, RoutedMessage>;
/// Stream of per-message delivery outcomes.
pub type OutcomeStream = BoxStream<'static, SinkOutcome>;

/// Delivery failure reported by a sink.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The downstream system could not be reached.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    /// The downstream system refused the message.
    #[error("message rejected by topic {topic}: {reason}")]
    Rejected {
        /// Topic the message was bound for.
        topic: String,
        /// Reason given by the downstream system.
        reason: String,
    },
}

/// Result of delivering one message.
#[derive(Debug)]
pub enum SinkOutcome {
    /// The sink took responsibility for the message.
    Consumed(RoutedMessage),
    /// Delivery failed.
    Failed(RoutedMessage, SinkError),
}

/// Destination for routed messages.
pub trait Sink: Send + Sync {
    /// Deliver `messages`, yielding one outcome per message.
    fn send(&self, messages: MessageStream) -> OutcomeStream;
}

/// Sink that logs every message and reports it as consumed.
///
/// Used when no message bus is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSink;

impl Sink for LoggingSink {
    fn send(&self, messages: MessageStream) -> OutcomeStream {
        messages
            .map(|message| {
                tracing::debug!(
                    topic = %message.target_topic,
                    partition = message.partition,
                    size = message.payload().len(),
                    "message delivered"
                );
                SinkOutcome::Consumed(message)
            })
            .boxed()
    }
}

/// Delivery totals for one connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Messages the sink consumed.
    pub sent: u64,
    /// Messages the sink failed to deliver.
    pub failed: u64,
}

impl DeliveryReport {
    /// Count one outcome.
    pub fn record(&mut self, outcome: &SinkOutcome) {
        match outcome {
            SinkOutcome::Consumed(_) => self.sent += 1,
            SinkOutcome::Failed(..) => self.failed += 1,
        }
    }
}

/// Drive an outcome stream to completion, recording each outcome.
///
/// Failures count as drops with cause "delivery failed"; they never end the
/// connection.
pub async fn account_outcomes(
    mut outcomes: OutcomeStream,
    metrics: Arc<dyn Metrics>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    while let Some(outcome) = outcomes.next().await {
        report.record(&outcome);
        match outcome {
            SinkOutcome::Consumed(message) => {
                metrics.notify_message_sent(&message.target_topic);
            }
            SinkOutcome::Failed(message, error) => {
                tracing::warn!(
                    topic = %message.target_topic,
                    partition = message.partition,
                    %error,
                    "message delivery failed"
                );
                metrics.notify_message_dropped(MessageDropCause::DeliveryFailed);
            }
        }
    }
    report
}

//! In-memory [`Sink`] that keeps every message it consumes.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use futures::StreamExt;
use event_collector::{
    message::RoutedMessage,
    sink::{MessageStream, OutcomeStream, Sink, SinkError, SinkOutcome},
};

/// Sink collecting consumed messages and failing configured topics.
#[derive(Clone, Debug, Default)]
pub struct CollectingSink {
    consumed: Arc<Mutex<Vec<RoutedMessage>>>,
    failing_topics: Arc<HashSet<String>>,
}

impl CollectingSink {
    /// Sink that consumes everything.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Sink that fails every message bound for one of `topics`.
    #[must_use]
    pub fn failing_for<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            consumed: Arc::default(),
            failing_topics: Arc::new(topics.into_iter().map(Into::into).collect()),
        }
    }

    /// Messages consumed so far, in delivery order.
    #[must_use]
    pub fn consumed(&self) -> Vec<RoutedMessage> {
        self.consumed.lock().expect("sink lock poisoned").clone()
    }

    /// Topics of the consumed messages, in delivery order.
    #[must_use]
    pub fn consumed_topics(&self) -> Vec<String> {
        self.consumed()
            .into_iter()
            .map(|message| message.target_topic)
            .collect()
    }
}

impl Sink for CollectingSink {
    fn send(&self, messages: MessageStream) -> OutcomeStream {
        let consumed = Arc::clone(&self.consumed);
        let failing = Arc::clone(&self.failing_topics);
        messages
            .map(move |message| {
                if failing.contains(&message.target_topic) {
                    let error = SinkError::Rejected {
                        topic: message.target_topic.clone(),
                        reason: "topic configured to fail".to_owned(),
                    };
                    return SinkOutcome::Failed(message, error);
                }
                consumed
                    .lock()
                    .expect("sink lock poisoned")
                    .push(message.clone());
                SinkOutcome::Consumed(message)
            })
            .boxed()
    }
}

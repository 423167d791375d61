//! Structured event messages flowing through the pipeline.
//!
//! A decoded [`Frame`] becomes a [`ValidatedMessage`] once its header passes
//! [`MessageValidator`], and a [`RoutedMessage`] once the router has chosen a
//! destination for it. Each stage takes ownership of the previous one.

mod header;
mod validation;

pub use header::{CommonEventHeader, DecodeError, DecodedHeader, Event, HeaderExtractor};
pub use validation::{MandatoryField, MessageValidator};

use crate::frame::Frame;

/// A frame whose header carries every mandatory field.
///
/// Only [`MessageValidator::validate`] constructs these.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedMessage {
    frame: Frame,
    header: DecodedHeader,
}

impl ValidatedMessage {
    /// Borrow the underlying frame.
    #[must_use]
    pub const fn frame(&self) -> &Frame { &self.frame }

    /// Borrow the decoded header.
    #[must_use]
    pub const fn header(&self) -> &DecodedHeader { &self.header }

    /// Event domain, if the producer set one.
    #[must_use]
    pub fn domain(&self) -> Option<&str> { self.header.domain.as_deref() }

    /// Split into the frame and its header.
    #[must_use]
    pub fn into_parts(self) -> (Frame, DecodedHeader) { (self.frame, self.header) }
}

/// A validated message bound for a specific topic partition.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutedMessage {
    /// Destination topic.
    pub target_topic: String,
    /// Destination partition within the topic.
    pub partition: i32,
    /// The message itself.
    pub message: ValidatedMessage,
}

impl RoutedMessage {
    /// Borrow the frame payload handed to the sink.
    #[must_use]
    pub fn payload(&self) -> &[u8] { self.message.frame().payload() }
}

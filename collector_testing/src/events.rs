//! Builders for structured event payloads.

use bytes::Bytes;
use event_collector::{
    frame::Frame,
    message::{CommonEventHeader, Event},
};

/// Header carrying every mandatory field and the given `domain`.
#[must_use]
pub fn complete_header(domain: &str) -> CommonEventHeader {
    CommonEventHeader {
        version: Some("4.0.1".to_owned()),
        domain: Some(domain.to_owned()),
        sequence: Some(1),
        event_id: Some(format!("{domain}-event")),
        event_name: Some(format!("{domain}_event")),
        start_epoch_microsec: Some(1_700_000_000_000_000),
        last_epoch_microsec: Some(1_700_000_000_500_000),
        reporting_entity_name: Some("reporter".to_owned()),
        source_name: Some("source".to_owned()),
        ..CommonEventHeader::default()
    }
}

/// Encoded event with `header` and a small opaque body.
#[must_use]
pub fn event_payload_with_header(header: CommonEventHeader) -> Bytes {
    Event {
        common_event_header: Some(header),
        event_fields: Bytes::from_static(b"opaque measurement body"),
    }
    .to_payload()
}

/// Encoded valid event for `domain`.
#[must_use]
pub fn event_payload(domain: &str) -> Bytes { event_payload_with_header(complete_header(domain)) }

/// Frame carrying a valid event for `domain`.
///
/// # Panics
///
/// Panics if the payload cannot be framed, which cannot happen for the
/// small fixed payloads built here.
#[must_use]
pub fn event_frame(domain: &str) -> Frame {
    Frame::structured_event(event_payload(domain)).expect("fixture payload fits a frame")
}

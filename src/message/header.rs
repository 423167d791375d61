//! Header-only decoding of structured event payloads.
//!
//! Payloads are protobuf-encoded [`Event`]s. The collector only needs the
//! [`CommonEventHeader`] sub-message, so [`HeaderExtractor`] decodes a view of
//! the event that declares nothing but the header field. The protobuf decoder
//! skips the event body as an unknown field without copying it.

use bytes::Bytes;
use prost::Message as _;
use thiserror::Error;

/// Common header carried by every structured event.
///
/// All fields track explicit presence: a field is `Some` only if the
/// producer encoded it, even when the encoded value is a default.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CommonEventHeader {
    /// Header schema version.
    #[prost(string, optional, tag = "1")]
    pub version: Option<String>,
    /// Event domain, used as the routing key.
    #[prost(string, optional, tag = "2")]
    pub domain: Option<String>,
    /// Per-source sequence number.
    #[prost(uint32, optional, tag = "3")]
    pub sequence: Option<u32>,
    /// Event priority.
    #[prost(int32, optional, tag = "4")]
    pub priority: Option<i32>,
    /// Unique event identifier.
    #[prost(string, optional, tag = "5")]
    pub event_id: Option<String>,
    /// Event name.
    #[prost(string, optional, tag = "6")]
    pub event_name: Option<String>,
    /// Event type.
    #[prost(string, optional, tag = "7")]
    pub event_type: Option<String>,
    /// Earliest time covered by the event, in microseconds since the epoch.
    #[prost(uint64, optional, tag = "8")]
    pub start_epoch_microsec: Option<u64>,
    /// Latest time covered by the event, in microseconds since the epoch.
    #[prost(uint64, optional, tag = "9")]
    pub last_epoch_microsec: Option<u64>,
    #[prost(string, optional, tag = "10")]
    pub nf_naming_code: Option<String>,
    #[prost(string, optional, tag = "11")]
    pub nfc_naming_code: Option<String>,
    #[prost(string, optional, tag = "12")]
    pub nf_vendor_name: Option<String>,
    #[prost(bytes = "vec", optional, tag = "13")]
    pub reporting_entity_id: Option<Vec<u8>>,
    /// Name of the entity reporting the event.
    #[prost(string, optional, tag = "14")]
    pub reporting_entity_name: Option<String>,
    #[prost(bytes = "vec", optional, tag = "15")]
    pub source_id: Option<Vec<u8>>,
    /// Name of the entity the event is about.
    #[prost(string, optional, tag = "16")]
    pub source_name: Option<String>,
    #[prost(string, optional, tag = "17")]
    pub time_zone_offset: Option<String>,
    #[prost(string, optional, tag = "18")]
    pub ves_event_listener_version: Option<String>,
}

/// Header fields decoded from a frame payload.
pub type DecodedHeader = CommonEventHeader;

/// A complete structured event as produced by clients.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Event {
    /// The event header.
    #[prost(message, optional, tag = "1")]
    pub common_event_header: Option<CommonEventHeader>,
    /// Opaque event body.
    #[prost(bytes = "bytes", tag = "2")]
    pub event_fields: Bytes,
}

impl Event {
    /// Encode the event into a payload suitable for a frame.
    #[must_use]
    pub fn to_payload(&self) -> Bytes { Bytes::from(self.encode_to_vec()) }
}

/// View of [`Event`] that leaves the body undecoded.
#[derive(Clone, PartialEq, prost::Message)]
struct EventHeaderView {
    #[prost(message, optional, tag = "1")]
    common_event_header: Option<CommonEventHeader>,
}

/// Failure to decode an event header.
#[derive(Debug, Error)]
#[error("malformed event payload: {0}")]
pub struct DecodeError(#[from] prost::DecodeError);

/// Decodes the [`CommonEventHeader`] from structured event payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderExtractor;

impl HeaderExtractor {
    /// Decode only the header of an encoded [`Event`].
    ///
    /// A payload without a header decodes to an empty header, which fails
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload is not valid protobuf.
    pub fn extract(&self, payload: &[u8]) -> Result<DecodedHeader, DecodeError> {
        let view = EventHeaderView::decode(payload)?;
        Ok(view.common_event_header.unwrap_or_default())
    }
}

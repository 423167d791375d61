//! Mandatory-field validation of decoded headers.

use std::fmt;

use super::{DecodedHeader, ValidatedMessage};
use crate::frame::Frame;

/// Header fields every event must carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MandatoryField {
    Version,
    EventName,
    EventId,
    SourceName,
    ReportingEntityName,
    StartEpochMicrosec,
    LastEpochMicrosec,
    Sequence,
}

impl MandatoryField {
    /// The complete mandatory set.
    pub const ALL: [Self; 8] = [
        Self::Version,
        Self::EventName,
        Self::EventId,
        Self::SourceName,
        Self::ReportingEntityName,
        Self::StartEpochMicrosec,
        Self::LastEpochMicrosec,
        Self::Sequence,
    ];

    /// Field name as used in the event schema.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::EventName => "eventName",
            Self::EventId => "eventId",
            Self::SourceName => "sourceName",
            Self::ReportingEntityName => "reportingEntityName",
            Self::StartEpochMicrosec => "startEpochMicrosec",
            Self::LastEpochMicrosec => "lastEpochMicrosec",
            Self::Sequence => "sequence",
        }
    }

    fn is_present(self, header: &DecodedHeader) -> bool {
        match self {
            Self::Version => header.version.is_some(),
            Self::EventName => header.event_name.is_some(),
            Self::EventId => header.event_id.is_some(),
            Self::SourceName => header.source_name.is_some(),
            Self::ReportingEntityName => header.reporting_entity_name.is_some(),
            Self::StartEpochMicrosec => header.start_epoch_microsec.is_some(),
            Self::LastEpochMicrosec => header.last_epoch_microsec.is_some(),
            Self::Sequence => header.sequence.is_some(),
        }
    }
}

impl fmt::Display for MandatoryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Checks headers against the fixed mandatory-field set.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageValidator;

impl MessageValidator {
    /// Whether every mandatory field is present.
    #[must_use]
    pub fn is_valid(&self, header: &DecodedHeader) -> bool {
        MandatoryField::ALL
            .iter()
            .all(|field| field.is_present(header))
    }

    /// List the mandatory fields absent from `header`, in schema order.
    #[must_use]
    pub fn missing_fields(&self, header: &DecodedHeader) -> Vec<MandatoryField> {
        MandatoryField::ALL
            .into_iter()
            .filter(|field| !field.is_present(header))
            .collect()
    }

    /// Pair a frame with its header once the header passes validation.
    ///
    /// # Errors
    ///
    /// Returns the missing fields when validation fails. The frame is dropped.
    pub fn validate(
        &self,
        frame: Frame,
        header: DecodedHeader,
    ) -> Result<ValidatedMessage, Vec<MandatoryField>> {
        let missing = self.missing_fields(&header);
        if missing.is_empty() {
            Ok(ValidatedMessage { frame, header })
        } else {
            Err(missing)
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn complete_header() -> DecodedHeader {
        DecodedHeader {
            version: Some("4.0".to_owned()),
            event_name: Some("perf3gpp_measurement".to_owned()),
            event_id: Some("id-1".to_owned()),
            source_name: Some("node-a".to_owned()),
            reporting_entity_name: Some("collector".to_owned()),
            start_epoch_microsec: Some(100),
            last_epoch_microsec: Some(200),
            sequence: Some(1),
            ..DecodedHeader::default()
        }
    }

    fn without(field: MandatoryField) -> DecodedHeader {
        let mut header = complete_header();
        match field {
            MandatoryField::Version => header.version = None,
            MandatoryField::EventName => header.event_name = None,
            MandatoryField::EventId => header.event_id = None,
            MandatoryField::SourceName => header.source_name = None,
            MandatoryField::ReportingEntityName => header.reporting_entity_name = None,
            MandatoryField::StartEpochMicrosec => header.start_epoch_microsec = None,
            MandatoryField::LastEpochMicrosec => header.last_epoch_microsec = None,
            MandatoryField::Sequence => header.sequence = None,
        }
        header
    }

    #[test]
    fn complete_header_is_valid() {
        assert!(MessageValidator.is_valid(&complete_header()));
    }

    #[test]
    fn optional_fields_do_not_affect_validity() {
        let header = DecodedHeader {
            domain: Some("perf3gpp".to_owned()),
            priority: Some(2),
            nf_vendor_name: Some("vendor".to_owned()),
            source_id: Some(vec![1, 2]),
            ..complete_header()
        };
        assert!(MessageValidator.is_valid(&header));
    }

    #[rstest]
    #[case(MandatoryField::Version)]
    #[case(MandatoryField::EventName)]
    #[case(MandatoryField::EventId)]
    #[case(MandatoryField::SourceName)]
    #[case(MandatoryField::ReportingEntityName)]
    #[case(MandatoryField::StartEpochMicrosec)]
    #[case(MandatoryField::LastEpochMicrosec)]
    #[case(MandatoryField::Sequence)]
    fn missing_any_mandatory_field_is_invalid(#[case] field: MandatoryField) {
        let header = without(field);
        assert!(!MessageValidator.is_valid(&header));
        assert_eq!(MessageValidator.missing_fields(&header), vec![field]);
    }

    #[test]
    fn empty_string_counts_as_present() {
        let header = DecodedHeader {
            event_name: Some(String::new()),
            ..complete_header()
        };
        assert!(MessageValidator.is_valid(&header));
    }

    #[test]
    fn validate_pairs_frame_with_header() {
        let frame = Frame::structured_event(vec![1_u8]).expect("frame");
        let message = MessageValidator
            .validate(frame.clone(), complete_header())
            .expect("valid");
        assert_eq!(message.frame(), &frame);
        assert_eq!(message.header(), &complete_header());
    }
}

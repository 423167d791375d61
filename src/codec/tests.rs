//! Unit tests for the collector frame codec.
//!
//! Covers header layout, round-tripping, the incomplete/error distinction and
//! the `tokio_util` decoder contract of never consuming on failure.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};

use super::*;

fn header_bytes(major: u8, code: u16, len: u32) -> Vec<u8> {
    let mut bytes = vec![MARKER_BYTE, major, 3, 0, 0, 0];
    bytes.extend_from_slice(&code.to_be_bytes());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes
}

#[test]
fn encode_writes_fixed_header_layout() {
    let frame = Frame::structured_event(vec![0xDE_u8, 0xAD]).expect("frame");
    let bytes = FrameCodec::encode(&frame);

    assert_eq!(
        bytes.as_ref(),
        &[0xAA, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0xDE, 0xAD]
    );
}

#[test]
fn decodes_single_frame_with_four_byte_payload() {
    let codec = FrameCodec::default();
    let mut wire = header_bytes(SUPPORTED_VERSION_MAJOR, 0x0001, 4);
    wire.extend_from_slice(&[1, 2, 3, 4]);
    let buffer = Bytes::from(wire);

    let DecodeOutcome::Frame(frame, consumed) = codec.decode_one(&buffer, 0) else {
        panic!("expected a frame");
    };
    assert_eq!(frame.payload_size(), 4);
    assert_eq!(frame.payload(), &[1, 2, 3, 4]);
    assert_eq!(frame.version_minor(), 3);
    assert_eq!(consumed, HEADER_SIZE + 4);
}

#[test]
fn decode_one_honours_offset() {
    let codec = FrameCodec::default();
    let first = Frame::structured_event(vec![1_u8]).expect("frame");
    let second = Frame::structured_event(vec![2_u8, 2]).expect("frame");
    let mut wire = BytesMut::new();
    FrameCodec::encode_into(&first, &mut wire);
    FrameCodec::encode_into(&second, &mut wire);
    let wire = wire.freeze();

    assert_eq!(
        codec.decode_one(&wire, first.frame_len()),
        DecodeOutcome::Frame(second, HEADER_SIZE + 2)
    );
}

#[rstest]
#[case::empty(&[], Incomplete::Header { have: 0, need: 12 })]
#[case::three_bytes(&[0xAA, 0x01, 0x00], Incomplete::Header { have: 3, need: 12 })]
#[case::header_only(
    &[0xAA, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x04],
    Incomplete::Payload { have: 0, need: 4 }
)]
#[case::partial_payload(
    &[0xAA, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x09],
    Incomplete::Payload { have: 1, need: 4 }
)]
fn short_input_is_incomplete(#[case] input: &'static [u8], #[case] expected: Incomplete) {
    let codec = FrameCodec::default();
    assert_eq!(
        codec.decode_one(&Bytes::from_static(input), 0),
        DecodeOutcome::Incomplete(expected)
    );
}

#[rstest]
#[case::bad_marker(vec![0x00], ProtocolError::InvalidMarker { found: 0x00 })]
#[case::bad_version(header_bytes(2, 0x0001, 0), ProtocolError::UnsupportedVersion { major: 2 })]
#[case::bad_payload_type(
    header_bytes(SUPPORTED_VERSION_MAJOR, 0x0007, 0),
    ProtocolError::UnsupportedPayloadType { code: 0x0007 }
)]
#[case::oversized(
    header_bytes(SUPPORTED_VERSION_MAJOR, 0x0001, 65),
    ProtocolError::PayloadTooLarge { size: 65, max: 64 }
)]
fn malformed_headers_are_protocol_errors(#[case] input: Vec<u8>, #[case] expected: ProtocolError) {
    let codec = FrameCodec::new(64);
    assert_eq!(
        codec.decode_one(&Bytes::from(input), 0),
        DecodeOutcome::Error(expected)
    );
}

#[test]
fn oversized_payload_is_rejected_before_payload_arrives() {
    let codec = FrameCodec::new(16);
    let header = header_bytes(SUPPORTED_VERSION_MAJOR, 0x0001, 1024);
    assert!(matches!(
        codec.decode_one(&Bytes::from(header), 0),
        DecodeOutcome::Error(ProtocolError::PayloadTooLarge { size: 1024, max: 16 })
    ));
}

#[test]
fn decoder_leaves_buffer_untouched_when_incomplete() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&[0xAA_u8, 0x01, 0x00][..]);

    assert!(codec.decode(&mut buf).expect("no error").is_none());
    assert_eq!(buf.as_ref(), &[0xAA, 0x01, 0x00]);
}

#[test]
fn decoder_leaves_buffer_untouched_on_error() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&[0x00_u8, 0xAA][..]);

    let err = codec.decode(&mut buf).expect_err("invalid marker");
    assert!(matches!(
        err,
        CodecError::Protocol(ProtocolError::InvalidMarker { found: 0 })
    ));
    assert_eq!(buf.len(), 2);
}

#[test]
fn encoder_rejects_payload_over_limit() {
    let mut codec = FrameCodec::new(2);
    let frame = Frame::structured_event(vec![0_u8; 3]).expect("frame");
    let mut buf = BytesMut::new();

    let err = codec.encode(frame, &mut buf).expect_err("oversized");
    assert!(matches!(
        err,
        CodecError::Protocol(ProtocolError::PayloadTooLarge { size: 3, max: 2 })
    ));
    assert!(buf.is_empty());
}

#[test]
fn decoded_payload_shares_input_memory() {
    let codec = FrameCodec::default();
    let frame = Frame::structured_event(vec![7_u8; 8]).expect("frame");
    let wire = FrameCodec::encode(&frame);

    let DecodeOutcome::Frame(decoded, _) = codec.decode_one(&wire, 0) else {
        panic!("expected a frame");
    };
    assert_eq!(decoded.payload().as_ptr(), wire[HEADER_SIZE..].as_ptr());
}

#[test]
fn max_payload_size_is_clamped_to_length_field() {
    let codec = FrameCodec::new(usize::MAX);
    assert_eq!(codec.max_payload_size(), u32::MAX as usize);
}

proptest! {
    #[test]
    fn round_trip_within_limit(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let codec = FrameCodec::new(512);
        let frame = Frame::structured_event(payload.clone()).expect("frame");
        let wire = FrameCodec::encode(&frame);

        prop_assert_eq!(
            codec.decode_one(&wire, 0),
            DecodeOutcome::Frame(frame, HEADER_SIZE + payload.len())
        );
    }

    #[test]
    fn decoder_and_decode_one_agree(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..8)
    ) {
        let mut codec = FrameCodec::new(64);
        let mut wire = BytesMut::new();
        for payload in &payloads {
            let frame = Frame::structured_event(payload.clone()).expect("frame");
            codec.encode(frame, &mut wire).expect("encode");
        }

        for payload in &payloads {
            let frame = codec.decode(&mut wire).expect("decode").expect("frame");
            prop_assert_eq!(frame.payload(), payload.as_slice());
        }
        prop_assert!(wire.is_empty());
    }
}

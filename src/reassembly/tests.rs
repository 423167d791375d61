//! Tests for chunked frame reassembly, demand handling and buffer ownership.

use std::num::NonZeroUsize;

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rstest::{fixture, rstest};

use super::*;
use crate::codec::ProtocolError;

fn frame(payload: &[u8]) -> Frame {
    Frame::structured_event(payload.to_vec()).expect("frame within limits")
}

fn wire(frames: &[Frame]) -> Bytes {
    let mut dst = BytesMut::new();
    for frame in frames {
        FrameCodec::encode_into(frame, &mut dst);
    }
    dst.freeze()
}

fn bounded(n: usize) -> Demand {
    let Some(n) = NonZeroUsize::new(n) else {
        panic!("demand must be non-zero");
    };
    Demand::Bounded(n)
}

fn collect_ok(frames: Frames<'_>) -> Vec<Frame> {
    frames
        .map(|item| item.expect("no protocol failure"))
        .collect()
}

#[fixture]
fn reassembler() -> FrameReassembler {
    let mut reassembler = FrameReassembler::new(FrameCodec::new(256));
    reassembler.subscribe().expect("first subscription");
    reassembler
}

#[rstest]
fn whole_frame_chunk_yields_frame_and_releases_memory(mut reassembler: FrameReassembler) {
    let expected = frame(&[1, 2, 3, 4]);
    let mut frames = reassembler
        .on_chunk(wire(std::slice::from_ref(&expected)), Demand::Unbounded)
        .expect("accepted");

    let decoded = frames.next().expect("one frame").expect("valid frame");
    assert_eq!(decoded, expected);
    assert_eq!(decoded.payload_size(), 4);
    assert!(frames.next().is_none());
    assert_eq!(frames.end(), Some(SequenceEnd::Drained));
    drop(frames);

    assert_eq!(reassembler.buffered_len(), 0);
    assert_eq!(reassembler.buffer().capacity(), 0);
    assert_eq!(reassembler.buffer().consumed(), 16);
}

#[rstest]
fn short_chunk_is_retained(mut reassembler: FrameReassembler) {
    let frames = collect_ok(
        reassembler
            .on_chunk(Bytes::from_static(&[0xAA, 0x01, 0x00]), Demand::Unbounded)
            .expect("accepted"),
    );

    assert!(frames.is_empty());
    assert_eq!(reassembler.buffered_len(), 3);
    assert!(!reassembler.is_failed());
}

#[rstest]
fn single_invalid_byte_fails_and_returns_bytes(mut reassembler: FrameReassembler) {
    let mut frames = reassembler
        .on_chunk(Bytes::from_static(&[0x00]), Demand::Unbounded)
        .expect("accepted");

    let failure = frames.next().expect("an item").expect_err("invalid marker");
    assert_eq!(failure.error, ProtocolError::InvalidMarker { found: 0x00 });
    assert_eq!(failure.rejected.as_ref(), &[0x00]);
    assert!(frames.next().is_none());
    assert_eq!(frames.end(), Some(SequenceEnd::Failed));
    drop(frames);

    assert!(reassembler.is_failed());
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
fn error_after_valid_frames_returns_only_offending_bytes(mut reassembler: FrameReassembler) {
    let good = frame(&[5]);
    let mut input = BytesMut::from(wire(std::slice::from_ref(&good)).as_ref());
    input.extend_from_slice(&[0x17, 0x18]);

    let items: Vec<_> = reassembler
        .on_chunk(input.freeze(), Demand::Unbounded)
        .expect("accepted")
        .collect();

    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(f) if *f == good));
    let Err(failure) = &items[1] else {
        panic!("expected a failure after the valid frame");
    };
    assert_eq!(failure.rejected.as_ref(), &[0x17, 0x18]);
}

#[rstest]
fn chunks_after_failure_are_handed_back(mut reassembler: FrameReassembler) {
    let _ = reassembler
        .on_chunk(Bytes::from_static(&[0x01]), Demand::Unbounded)
        .expect("accepted")
        .count();

    let rejected = reassembler
        .on_chunk(Bytes::from_static(&[0xAA]), Demand::Unbounded)
        .expect_err("terminated");
    assert_eq!(rejected.error, ReassemblyError::Terminated);
    assert_eq!(rejected.into_chunk().as_ref(), &[0xAA]);
}

#[rstest]
fn bounded_demand_stops_early_and_resumes(mut reassembler: FrameReassembler) {
    let expected: Vec<_> = (0_u8..5).map(|i| frame(&[i; 3])).collect();

    let mut frames = reassembler
        .on_chunk(wire(&expected), bounded(2))
        .expect("accepted");
    let first: Vec<_> = frames.by_ref().map(|f| f.expect("valid")).collect();
    assert_eq!(frames.end(), Some(SequenceEnd::DemandSatisfied));
    drop(frames);
    assert_eq!(first, expected[..2]);
    assert_eq!(reassembler.buffered_len(), 3 * 15);

    let second = collect_ok(reassembler.pull(bounded(2)).expect("active"));
    assert_eq!(second, expected[2..4]);

    let mut rest = reassembler.pull(Demand::Unbounded).expect("active");
    let third: Vec<_> = rest.by_ref().map(|f| f.expect("valid")).collect();
    assert_eq!(rest.end(), Some(SequenceEnd::Drained));
    assert_eq!(third, expected[4..]);
}

#[rstest]
fn second_subscription_is_refused(mut reassembler: FrameReassembler) {
    assert_eq!(
        reassembler.subscribe(),
        Err(ReassemblyError::AlreadySubscribed)
    );
    reassembler.cancel();
    assert_eq!(
        reassembler.subscribe(),
        Err(ReassemblyError::AlreadySubscribed)
    );
}

#[test]
fn frames_require_a_subscriber() {
    let mut reassembler = FrameReassembler::new(FrameCodec::default());
    let rejected = reassembler
        .on_chunk(Bytes::from_static(&[0xAA]), Demand::Unbounded)
        .expect_err("no subscriber");
    assert_eq!(rejected.error, ReassemblyError::NotSubscribed);
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
fn cancellation_keeps_buffer_until_close(mut reassembler: FrameReassembler) {
    let partial = wire(&[frame(&[1, 2, 3])]).slice(..7);
    let _ = reassembler
        .on_chunk(partial, Demand::Unbounded)
        .expect("accepted")
        .count();

    reassembler.cancel();
    assert_eq!(
        reassembler.pull(Demand::Unbounded).map(Iterator::count),
        Err(ReassemblyError::Cancelled)
    );
    assert_eq!(reassembler.buffered_len(), 7);

    assert_eq!(reassembler.close(), 7);
    assert_eq!(reassembler.buffered_len(), 0);
    assert_eq!(reassembler.buffer().capacity(), 0);
}

#[rstest]
fn leftover_is_compacted_away_from_consumed_frames(mut reassembler: FrameReassembler) {
    let frames = [frame(&[1; 64]), frame(&[2; 64])];
    let encoded = wire(&frames);
    let cut = frames[0].frame_len() + 4;

    let decoded = collect_ok(
        reassembler
            .on_chunk(encoded.slice(..cut), Demand::Unbounded)
            .expect("accepted"),
    );
    assert_eq!(decoded.len(), 1);
    assert_eq!(reassembler.buffered_len(), 4);
    assert!(reassembler.buffer().capacity() < cut);
}

#[test]
fn appended_chunks_accumulate_in_order() {
    let mut buffer = ReassemblyBuffer::new();
    let shared = Bytes::from_static(&[0xAA, 0x01]);

    buffer.append(shared.clone());
    buffer.append(Bytes::from_static(&[0x00]));
    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.take_remaining().as_ref(), &[0xAA, 0x01, 0x00]);
    assert!(buffer.is_empty());
    assert_eq!(shared.as_ref(), &[0xAA, 0x01]);
}

proptest! {
    #[test]
    fn chunk_boundaries_do_not_change_output(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..40), 1..6),
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let expected: Vec<_> = payloads.iter().map(|p| frame(p)).collect();
        let encoded = wire(&expected);

        let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(encoded.len() + 1)).collect();
        offsets.push(0);
        offsets.push(encoded.len());
        offsets.sort_unstable();
        offsets.dedup();

        let mut reassembler = FrameReassembler::new(FrameCodec::new(64));
        reassembler.subscribe().expect("subscribe");
        let mut decoded = Vec::new();
        for window in offsets.windows(2) {
            let chunk = encoded.slice(window[0]..window[1]);
            for item in reassembler.on_chunk(chunk, Demand::Unbounded).expect("accepted") {
                decoded.push(item.expect("valid frame"));
            }
        }

        prop_assert_eq!(decoded, expected);
        prop_assert_eq!(reassembler.buffered_len(), 0);
    }
}

//! Test fixtures for driving the `event_collector` pipeline.
//!
//! Provides event payload builders, raw wire encoders, chunk splitters, a
//! [`RecordingMetrics`] backend that counts every notification, and a
//! [`CollectingSink`] that keeps delivered messages for assertions.
//!
//! ```rust
//! use collector_testing::{encode_frames, event_frame};
//!
//! let wire = encode_frames(&[event_frame("perf3gpp"), event_frame("fault")]);
//! assert_eq!(wire[0], 0xAA);
//! ```

mod events;
mod metrics;
mod sink;
mod wire;

pub use events::{complete_header, event_frame, event_payload, event_payload_with_header};
pub use metrics::{RecordingMetrics, recording_metrics};
pub use sink::CollectingSink;
pub use wire::{encode_frames, raw_frame, raw_header, split_at_offsets, split_every};

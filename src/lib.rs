#![doc(html_root_url = "https://docs.rs/event-collector/latest")]
//! Public API for the `event_collector` library.
//!
//! The collector accepts framed structured events from network clients,
//! reassembles frames from arbitrarily split byte chunks, validates each
//! event's common header and routes it to a message-bus topic. The
//! building blocks are usable on their own: [`codec`] for the wire format,
//! [`reassembly`] for chunked input, [`pipeline`] for the per-connection
//! decode, validate and route chain, and [`server`] for the TCP front end.

pub mod codec;
pub mod config;
pub mod frame;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod reassembly;
pub mod routing;
pub mod server;
pub mod sink;

pub use codec::{CodecError, DecodeOutcome, FrameCodec, Incomplete, ProtocolError};
pub use frame::{Frame, FrameHeader, PayloadType};
pub use message::{RoutedMessage, ValidatedMessage};
pub use metrics::{Metrics, NoopMetrics};
pub use pipeline::{Batch, BatchEnd, Pipeline};
pub use reassembly::{Demand, FrameReassembler, ProtocolFailure, ReassemblyError};
pub use routing::{Route, Router};
pub use server::{CollectorServer, ServerError};
pub use sink::{Sink, SinkOutcome};

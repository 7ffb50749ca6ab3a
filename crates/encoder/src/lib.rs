//! GoLive Encoder
//!
//! Turns composited frames and mixed audio into a muxed byte stream.
//!
//! - [`probe_capabilities`] asks the transcoder what it can do
//! - [`BackendRegistry::open`] tries backends in preference order
//!   (hardware first, software last) and records every failure
//! - [`EncoderSession`] hides the chosen backend behind bounded,
//!   reject-new submission queues and an ordered packet stream

pub mod args;
pub mod backend;
pub mod probe;
pub mod registry;
pub mod session;

pub use backend::{EncoderBackend, EncoderControl, EncoderStreams, TranscoderBackend};
pub use probe::{probe_capabilities, Capabilities};
pub use registry::BackendRegistry;
pub use session::{EncoderInput, EncoderSession, SubmitOutcome};

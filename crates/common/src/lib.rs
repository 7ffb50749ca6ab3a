//! GoLive Common Utilities
//!
//! Shared infrastructure for all GoLive crates:
//! - Error types and result aliases
//! - Master clock and drift measurement for audio/video synchronization
//! - Bounded queues used for every cross-task hand-off
//! - Tracing/logging initialization
//! - Configuration loading
//! - External transcoder process handling

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod queue;
pub mod transcoder;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use queue::*;

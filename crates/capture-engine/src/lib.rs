//! GoLive Capture Engine
//!
//! The source manager. Every attached source runs its own acquisition task
//! and hands normalized samples to the rest of the pipeline through bounded
//! queues.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  SourceManager                   │
//! │  ┌──────────┐  ┌──────────┐  ┌───────────────┐   │
//! │  │ Camera / │  │ Media /  │  │ Test pattern  │   │
//! │  │ Screen   │  │ Network  │  │ (in-process)  │   │
//! │  └────┬─────┘  └────┬─────┘  └──────┬────────┘   │
//! │       │ PtsGuard    │ PtsGuard      │ PtsGuard   │
//! │       ▼             ▼               ▼            │
//! │  video queue (drop-oldest)  audio queue (reject) │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod guard;
pub mod manager;
pub mod registry;

pub use backend::{SourceBackend, SourceSample};
pub use guard::{PtsAnomaly, PtsGuard};
pub use manager::{SourceHandle, SourceManager, SourceStatus};
pub use registry::{SourceConstructor, SourceContext, SourceRegistry};

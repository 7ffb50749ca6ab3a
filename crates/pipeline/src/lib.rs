//! GoLive Pipeline
//!
//! Wires the engines into one live session:
//!
//! ```text
//! sources ──video──▶ render task ──frames──▶ encoder ──packets──▶ output sink
//!         ──audio──▶ mixer task  ──chunks──────▲
//! ```
//!
//! [`PipelineController`] is the only type most callers need. It starts and
//! stops sessions, mirrors output reconnects into its state, and reports a
//! [`golive_common::error::FailureCause`] when a session fails.

pub mod controller;
pub mod overload;
pub mod quality;
pub mod render;
pub mod services;
pub mod spec;
mod state;

pub use controller::PipelineController;
pub use overload::{OverloadEvent, OverloadTracker};
pub use quality::{apply_level, closest_level, QualityGovernor, QualityStatus};
pub use render::{CycleReport, RenderLoop, RenderMonitor, RenderSettings};
pub use services::PipelineServices;
pub use spec::{tiled_scene, PipelineSpec};

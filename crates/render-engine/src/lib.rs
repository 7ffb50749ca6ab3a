//! GoLive Render Engine
//!
//! Real-time compositing for the live pipeline. The render task owns a
//! [`Compositor`] and a [`SceneGraph`]; a [`Synchronizer`] tells it which
//! output PTS to produce each cycle based on the audio master clock.
//!
//! # Render cycle
//!
//! ```text
//! source queues ──► Compositor::submit ──┐
//!                                        │
//! master clock ──► Synchronizer ──► targets (0, 1 or 2)
//!                                        │
//! scene edits ──► SceneUpdates ──► SceneGraph
//!                                        │
//!                                        ▼
//!                   per node: select frame ≤ target
//!                             apply effects
//!                             blend by z-order
//!                                        │
//!                                        ▼
//!                                 output Frame
//! ```

pub mod canvas;
pub mod compositor;
pub mod effect;
pub mod overlay;
pub mod scene;
pub mod sync;

pub use canvas::Canvas;
pub use compositor::{CompositeOutput, Compositor, CompositorConfig};
pub use effect::{Effect, EffectContext};
pub use overlay::{ImageFrame, ImageOverlay, OverlayAssets, TextAlign, TextAnimation, TextOverlay};
pub use scene::{scene_channel, SceneCommand, SceneEditor, SceneGraph, SceneNode, SceneUpdates, Transform};
pub use sync::{Correction, CyclePlan, Synchronizer};

//! GoLive Audio Engine
//!
//! Mixes every active audio input into one stream and owns the master clock:
//! the clock advances only as the mixer emits samples, and all video timing
//! is measured against it.

pub mod convert;
pub mod mixer;
pub mod task;

pub use mixer::AudioMixer;
pub use task::{spawn_mixer, MixerCommand, MixerHandle};

//! Summation mixer driving the master clock.

use std::sync::Arc;

use golive_common::clock::MasterClock;
use golive_media_model::{AudioChunk, MixerStats};

use crate::convert::conform;

/// Mixes audio chunks into the master format and advances the master clock
/// by every frame it emits.
#[derive(Debug)]
pub struct AudioMixer {
    clock: Arc<MasterClock>,
    channels: u16,
    /// Length of the silent chunk emitted when nothing is mixed.
    default_frames: usize,
    stats: MixerStats,
}

impl AudioMixer {
    pub fn new(clock: Arc<MasterClock>, channels: u16, default_frames: usize) -> Self {
        Self {
            clock,
            channels: channels.max(1),
            default_frames: default_frames.max(1),
            stats: MixerStats::default(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn clock(&self) -> &Arc<MasterClock> {
        &self.clock
    }

    pub fn stats(&self) -> MixerStats {
        MixerStats {
            clock_ns: self.clock.now_ns(),
            ..self.stats
        }
    }

    /// Sum `chunks` sample by sample.
    ///
    /// Inputs are converted to the mixer's rate and layout first; shorter
    /// inputs are padded with silence to the longest. Sums outside
    /// `[-1.0, 1.0]` are clamped and counted. An empty input set yields
    /// silence, so the clock keeps advancing when every source is quiet.
    pub fn mix(&mut self, chunks: &[AudioChunk]) -> AudioChunk {
        let rate = self.sample_rate();
        let channels = self.channels;

        let inputs: Vec<Vec<f32>> = chunks
            .iter()
            .map(|c| conform(c.samples(), c.channels(), c.sample_rate(), channels, rate))
            .collect();

        let len = inputs
            .iter()
            .map(Vec::len)
            .max()
            .filter(|&len| len > 0)
            .unwrap_or(self.default_frames * channels as usize);

        let mut mixed = vec![0.0f32; len];
        for input in &inputs {
            for (acc, sample) in mixed.iter_mut().zip(input) {
                *acc += *sample;
            }
        }

        let mut clipped = 0u64;
        for sample in &mut mixed {
            if *sample > 1.0 || *sample < -1.0 {
                clipped += 1;
                *sample = sample.clamp(-1.0, 1.0);
            } else if sample.is_nan() {
                clipped += 1;
                *sample = 0.0;
            }
        }

        let frames = (len / channels as usize) as u64;
        let pts_ns = self.clock.advance(frames);

        self.stats.chunks_mixed += 1;
        self.stats.clipped_samples += clipped;
        if clipped > 0 {
            tracing::trace!(clipped, pts_ns, "Clipping guard engaged");
        }

        AudioChunk::new(pts_ns, rate, channels, mixed)
            .unwrap_or_else(|_| AudioChunk::silence(pts_ns, rate, channels, frames as usize))
    }
}

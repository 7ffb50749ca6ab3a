//! Audio chunks.

use std::sync::Arc;

use golive_common::error::{GoliveError, GoliveResult};
use golive_common::samples_to_ns;

/// A fixed-duration block of interleaved `f32` samples in `[-1.0, 1.0]`.
#[derive(Clone, PartialEq)]
pub struct AudioChunk {
    pts_ns: u64,
    sample_rate: u32,
    channels: u16,
    samples: Arc<[f32]>,
}

impl std::fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioChunk")
            .field("pts_ns", &self.pts_ns)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("frames", &self.frames())
            .finish()
    }
}

impl AudioChunk {
    pub fn new(
        pts_ns: u64,
        sample_rate: u32,
        channels: u16,
        samples: Vec<f32>,
    ) -> GoliveResult<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(GoliveError::audio(format!(
                "Invalid audio format: {sample_rate} Hz, {channels} channels"
            )));
        }
        if samples.len() % channels as usize != 0 {
            return Err(GoliveError::audio(format!(
                "{} samples do not divide into {channels} channels",
                samples.len()
            )));
        }
        Ok(Self {
            pts_ns,
            sample_rate,
            channels,
            samples: Arc::from(samples),
        })
    }

    /// `frames` frames of silence.
    pub fn silence(pts_ns: u64, sample_rate: u32, channels: u16, frames: usize) -> Self {
        Self {
            pts_ns,
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            samples: Arc::from(vec![0.0; frames * channels.max(1) as usize]),
        }
    }

    pub fn pts_ns(&self) -> u64 {
        self.pts_ns
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ns(&self) -> u64 {
        samples_to_ns(self.frames() as u64, self.sample_rate)
    }

    /// PTS just past the last frame.
    pub fn end_pts_ns(&self) -> u64 {
        self.pts_ns + self.duration_ns()
    }

    /// Little-endian `f32` bytes, the transcoder's `f32le` input layout.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 4);
        for sample in self.samples.iter() {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }
}

//! Generated color bars with an optional sine tone.
//!
//! Paced in real time by the tokio timer, so it behaves like a live device
//! and works under a paused test clock.

use std::time::Duration;

use golive_common::clock::{samples_to_ns, SessionClock};
use golive_common::error::{GoliveError, GoliveResult};
use golive_media_model::{frame_pts_ns, AudioChunk, Frame, SourceCapability, SourceConfig};
use tokio::time::Instant;

use super::{SourceBackend, SourceSample};

const BARS: [[u8; 4]; 8] = [
    [235, 235, 235, 255],
    [235, 235, 16, 255],
    [16, 235, 235, 255],
    [16, 235, 16, 255],
    [235, 16, 235, 255],
    [235, 16, 16, 255],
    [16, 16, 235, 255],
    [16, 16, 16, 255],
];

/// 20 ms audio chunks.
const AUDIO_CHUNKS_PER_SEC: u32 = 50;

pub struct TestPatternSource {
    config: SourceConfig,
    tone_hz: Option<f32>,
    clock: SessionClock,
    start: Option<Instant>,
    base_ns: u64,
    frame_index: u64,
    audio_frames: u64,
}

impl TestPatternSource {
    pub fn new(config: SourceConfig, tone_hz: Option<f32>, clock: SessionClock) -> Self {
        Self {
            config,
            tone_hz,
            clock,
            start: None,
            base_ns: 0,
            frame_index: 0,
            audio_frames: 0,
        }
    }

    fn chunk_frames(&self) -> u64 {
        (self.config.sample_rate / AUDIO_CHUNKS_PER_SEC).max(1) as u64
    }

    fn next_video_due(&self) -> Option<u64> {
        self.config
            .video
            .then(|| frame_pts_ns(self.frame_index, self.config.fps))
    }

    fn next_audio_due(&self) -> Option<u64> {
        self.config
            .audio
            .then(|| samples_to_ns(self.audio_frames, self.config.sample_rate))
    }

    fn render_frame(&self, pts_ns: u64) -> Frame {
        let width = self.config.width.max(1);
        let height = self.config.height.max(1);
        let marker_w = (width / 16).max(1);
        let marker_x = ((self.frame_index * 4) % width as u64) as u32;
        let marker_top = height * 3 / 4;

        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let in_marker = y >= marker_top && x >= marker_x && x < marker_x + marker_w;
                let px = if in_marker {
                    [255, 255, 255, 255]
                } else {
                    BARS[(x as usize * BARS.len()) / width as usize]
                };
                data.extend_from_slice(&px);
            }
        }
        // Length matches by construction.
        Frame::new(
            pts_ns,
            width,
            height,
            golive_media_model::PixelFormat::Rgba8,
            data,
        )
        .unwrap_or_else(|_| Frame::solid(pts_ns, width, height, BARS[0]))
    }

    fn render_audio(&self, pts_ns: u64) -> GoliveResult<AudioChunk> {
        let frames = self.chunk_frames();
        let channels = self.config.channels.max(1);
        let rate = self.config.sample_rate as f64;
        let mut samples = Vec::with_capacity(frames as usize * channels as usize);
        for i in 0..frames {
            let value = match self.tone_hz {
                Some(hz) => {
                    let t = (self.audio_frames + i) as f64 / rate;
                    (0.25 * (2.0 * std::f64::consts::PI * hz as f64 * t).sin()) as f32
                }
                None => 0.0,
            };
            samples.extend(std::iter::repeat(value).take(channels as usize));
        }
        AudioChunk::new(pts_ns, self.config.sample_rate, channels, samples)
    }
}

#[async_trait::async_trait]
impl SourceBackend for TestPatternSource {
    fn name(&self) -> &str {
        self.config.id.as_str()
    }

    fn capability(&self) -> SourceCapability {
        self.config.capability()
    }

    async fn open(&mut self) -> GoliveResult<()> {
        if self.config.fps == 0 || self.config.sample_rate == 0 {
            return Err(GoliveError::capture(format!(
                "Test pattern {} needs a non-zero frame and sample rate",
                self.config.id
            )));
        }
        self.start = Some(Instant::now());
        self.base_ns = self.clock.elapsed_ns();
        self.frame_index = 0;
        self.audio_frames = 0;
        tracing::debug!(source = %self.config.id, "Test pattern opened");
        Ok(())
    }

    async fn read(&mut self) -> GoliveResult<Option<SourceSample>> {
        let start = self
            .start
            .ok_or_else(|| GoliveError::invalid_state("Test pattern read before open"))?;

        let (offset_ns, is_video) = match (self.next_video_due(), self.next_audio_due()) {
            (Some(v), Some(a)) if a < v => (a, false),
            (Some(v), _) => (v, true),
            (None, Some(a)) => (a, false),
            (None, None) => return Ok(None),
        };

        tokio::time::sleep_until(start + Duration::from_nanos(offset_ns)).await;

        let pts_ns = self.base_ns + offset_ns;
        if is_video {
            let frame = self.render_frame(pts_ns);
            self.frame_index += 1;
            Ok(Some(SourceSample::Video(frame)))
        } else {
            let chunk = self.render_audio(pts_ns)?;
            self.audio_frames += self.chunk_frames();
            Ok(Some(SourceSample::Audio(chunk)))
        }
    }

    async fn close(&mut self) -> GoliveResult<()> {
        self.start = None;
        Ok(())
    }
}

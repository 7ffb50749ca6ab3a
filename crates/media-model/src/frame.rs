//! Video frames and presentation timestamps.

use std::sync::Arc;

use golive_common::error::{GoliveError, GoliveResult};
use golive_common::NANOS_PER_SEC;
use serde::{Deserialize, Serialize};

/// PTS of output frame `index` at `fps`.
///
/// Computed from the index rather than accumulated, so consecutive indices
/// always yield strictly increasing values without rounding drift.
pub fn frame_pts_ns(index: u64, fps: u32) -> u64 {
    let fps = fps.max(1) as u128;
    ((index as u128 * NANOS_PER_SEC as u128) / fps) as u64
}

/// Duration of one frame at `fps`, rounded down.
pub fn frame_interval_ns(fps: u32) -> u64 {
    NANOS_PER_SEC / fps.max(1) as u64
}

/// Pixel layouts accepted from sources.
///
/// Everything downstream of the source manager is [`PixelFormat::Rgba8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Rgb8 => 3,
        }
    }

    /// Name used for the transcoder's rawvideo `-pix_fmt`.
    pub fn transcoder_name(self) -> &'static str {
        match self {
            Self::Rgba8 => "rgba",
            Self::Bgra8 => "bgra",
            Self::Rgb8 => "rgb24",
        }
    }
}

/// Immutable snapshot of pixel data.
///
/// Cloning a frame shares the pixel buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pts_ns: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Arc<[u8]>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("pts_ns", &self.pts_ns)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    /// Wrap pixel data, checking that its length matches the dimensions.
    pub fn new(
        pts_ns: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> GoliveResult<Self> {
        let expected = Self::byte_len(width, height, format);
        if width == 0 || height == 0 {
            return Err(GoliveError::capture(format!(
                "Frame dimensions must be non-zero, got {width}x{height}"
            )));
        }
        if data.len() != expected {
            return Err(GoliveError::capture(format!(
                "Frame buffer is {} bytes, expected {expected} for {width}x{height} {format:?}",
                data.len()
            )));
        }
        Ok(Self {
            pts_ns,
            width,
            height,
            format,
            data: Arc::from(data),
        })
    }

    /// A frame filled with one RGBA color.
    pub fn solid(pts_ns: u64, width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgba);
        }
        Self {
            pts_ns,
            width,
            height,
            format: PixelFormat::Rgba8,
            data: Arc::from(data),
        }
    }

    pub fn byte_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    pub fn pts_ns(&self) -> u64 {
        self.pts_ns
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The same pixels re-stamped with another PTS.
    pub fn with_pts(&self, pts_ns: u64) -> Self {
        Self {
            pts_ns,
            ..self.clone()
        }
    }

    /// Convert to RGBA8, sharing the buffer when already RGBA.
    pub fn into_rgba(self) -> Self {
        match self.format {
            PixelFormat::Rgba8 => self,
            PixelFormat::Bgra8 => {
                let mut data = self.data.to_vec();
                for px in data.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
                Self {
                    format: PixelFormat::Rgba8,
                    data: Arc::from(data),
                    ..self
                }
            }
            PixelFormat::Rgb8 => {
                let mut data = Vec::with_capacity(self.data.len() / 3 * 4);
                for px in self.data.chunks_exact(3) {
                    data.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                Self {
                    format: PixelFormat::Rgba8,
                    data: Arc::from(data),
                    ..self
                }
            }
        }
    }

    /// RGBA value at `(x, y)`. Returns transparent black outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0, 0];
        }
        let bpp = self.format.bytes_per_pixel();
        let i = (y as usize * self.width as usize + x as usize) * bpp;
        let px = &self.data[i..i + bpp];
        match self.format {
            PixelFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Bgra8 => [px[2], px[1], px[0], px[3]],
            PixelFormat::Rgb8 => [px[0], px[1], px[2], 255],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_wrong_length() {
        let err = Frame::new(0, 2, 2, PixelFormat::Rgba8, vec![0; 15]).unwrap_err();
        assert!(err.to_string().contains("expected 16"));
    }

    #[test]
    fn test_bgra_normalizes_to_rgba() {
        let frame = Frame::new(7, 1, 1, PixelFormat::Bgra8, vec![1, 2, 3, 4]).unwrap();
        let rgba = frame.into_rgba();
        assert_eq!(rgba.format(), PixelFormat::Rgba8);
        assert_eq!(rgba.data(), &[3, 2, 1, 4]);
        assert_eq!(rgba.pts_ns(), 7);
    }

    #[test]
    fn test_rgb_normalizes_with_opaque_alpha() {
        let frame = Frame::new(0, 2, 1, PixelFormat::Rgb8, vec![9, 8, 7, 6, 5, 4]).unwrap();
        assert_eq!(frame.into_rgba().data(), &[9, 8, 7, 255, 6, 5, 4, 255]);
    }

    #[test]
    fn test_frame_pts_is_exact_at_second_boundaries() {
        assert_eq!(frame_pts_ns(30, 30), 1_000_000_000);
        assert_eq!(frame_pts_ns(24, 24), 1_000_000_000);
        assert_eq!(frame_pts_ns(1, 30), 33_333_333);
    }

    proptest::proptest! {
        #[test]
        fn frame_pts_strictly_increasing(index in 0u64..10_000_000, fps in 1u32..240) {
            proptest::prop_assert!(frame_pts_ns(index + 1, fps) > frame_pts_ns(index, fps));
        }
    }
}

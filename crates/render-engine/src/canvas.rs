//! RGBA8 raster surface used for layers and the output frame.

use golive_common::error::{GoliveError, GoliveResult};
use golive_media_model::{Frame, PixelFormat};

use crate::scene::Transform;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32, fill: [u8; 4]) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&fill);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Copy a frame's pixels, converting to RGBA if needed.
    pub fn from_frame(frame: &Frame) -> Self {
        let rgba = frame.clone().into_rgba();
        Self {
            width: rgba.width(),
            height: rgba.height(),
            data: rgba.data().to_vec(),
        }
    }

    pub fn from_rgba_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Self::new(1, 1, [0, 0, 0, 0]);
        }
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Every pixel as a mutable `[r, g, b, a]` slice.
    pub fn pixels_mut(&mut self) -> std::slice::ChunksExactMut<'_, u8> {
        self.data.chunks_exact_mut(4)
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0, 0];
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    pub fn fill(&mut self, color: [u8; 4]) {
        for px in self.pixels_mut() {
            px.copy_from_slice(&color);
        }
    }

    /// Blend `layer` over this canvas with "over" compositing.
    ///
    /// The layer is scaled, rotated about its center, and placed at the
    /// transform's position. Each covered output pixel is inverse-mapped to
    /// the nearest layer pixel.
    pub fn draw_layer(&mut self, layer: &Canvas, transform: &Transform, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity <= 0.0 || transform.scale_x <= 0.0 || transform.scale_y <= 0.0 {
            return;
        }

        let lw = layer.width as f32;
        let lh = layer.height as f32;
        let half_w = lw * transform.scale_x / 2.0;
        let half_h = lh * transform.scale_y / 2.0;
        let cx = transform.x + half_w;
        let cy = transform.y + half_h;
        let (sin, cos) = transform.rotation_deg.to_radians().sin_cos();

        // Bounding box of the rotated rectangle.
        let ext_x = half_w * cos.abs() + half_h * sin.abs();
        let ext_y = half_w * sin.abs() + half_h * cos.abs();
        let x0 = (cx - ext_x).floor().max(0.0) as u32;
        let y0 = (cy - ext_y).floor().max(0.0) as u32;
        let x1 = ((cx + ext_x).ceil().max(0.0) as u32).min(self.width);
        let y1 = ((cy + ext_y).ceil().max(0.0) as u32).min(self.height);

        let opacity_255 = (opacity * 255.0).round() as u32;
        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                let rx = dx * cos + dy * sin;
                let ry = -dx * sin + dy * cos;
                let u = rx / transform.scale_x + lw / 2.0;
                let v = ry / transform.scale_y + lh / 2.0;
                if u < 0.0 || v < 0.0 || u >= lw || v >= lh {
                    continue;
                }
                let src = layer.pixel(u as u32, v as u32);
                let i = (y as usize * self.width as usize + x as usize) * 4;
                blend_over(&mut self.data[i..i + 4], src, opacity_255);
            }
        }
    }

    pub fn into_frame(self, pts_ns: u64) -> GoliveResult<Frame> {
        Frame::new(pts_ns, self.width, self.height, PixelFormat::Rgba8, self.data)
            .map_err(|e| GoliveError::render(format!("Canvas to frame failed: {e}")))
    }
}

/// Straight-alpha "over" for one pixel. `opacity` is 0..=255.
pub(crate) fn blend_over(dst: &mut [u8], src: [u8; 4], opacity: u32) {
    let sa = src[3] as u32 * opacity / 255;
    if sa == 0 {
        return;
    }
    if sa == 255 {
        dst.copy_from_slice(&src);
        return;
    }
    let da = dst[3] as u32;
    let inv = 255 - sa;
    let out_a = sa + da * inv / 255;
    if out_a == 0 {
        dst.copy_from_slice(&[0, 0, 0, 0]);
        return;
    }
    for c in 0..3 {
        let s = src[c] as u32 * sa;
        let d = dst[c] as u32 * da * inv / 255;
        dst[c] = ((s + d) / out_a).min(255) as u8;
    }
    dst[3] = out_a.min(255) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_layer_replaces_pixels() {
        let mut canvas = Canvas::new(4, 4, [0, 0, 0, 255]);
        let layer = Canvas::new(2, 2, [255, 0, 0, 255]);
        canvas.draw_layer(&layer, &Transform::at(1.0, 1.0), 1.0);
        assert_eq!(canvas.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(canvas.pixel(1, 1), [255, 0, 0, 255]);
        assert_eq!(canvas.pixel(2, 2), [255, 0, 0, 255]);
        assert_eq!(canvas.pixel(3, 3), [0, 0, 0, 255]);
    }

    #[test]
    fn test_half_opacity_blends() {
        let mut canvas = Canvas::new(1, 1, [0, 0, 0, 255]);
        let layer = Canvas::new(1, 1, [200, 100, 50, 255]);
        canvas.draw_layer(&layer, &Transform::at(0.0, 0.0), 0.5);
        let px = canvas.pixel(0, 0);
        assert!((99..=101).contains(&px[0]), "{px:?}");
        assert!((49..=51).contains(&px[1]), "{px:?}");
        assert_eq!(px[3], 255);
    }

    #[test]
    fn test_scale_covers_target_area() {
        let mut canvas = Canvas::new(8, 8, [0, 0, 0, 255]);
        let layer = Canvas::new(2, 2, [0, 255, 0, 255]);
        let transform = Transform {
            scale_x: 4.0,
            scale_y: 4.0,
            ..Transform::at(0.0, 0.0)
        };
        canvas.draw_layer(&layer, &transform, 1.0);
        assert_eq!(canvas.pixel(7, 7), [0, 255, 0, 255]);
        assert_eq!(canvas.pixel(0, 0), [0, 255, 0, 255]);
    }

    #[test]
    fn test_rotation_keeps_center_covered() {
        let mut canvas = Canvas::new(10, 10, [0, 0, 0, 255]);
        let layer = Canvas::new(4, 2, [0, 0, 255, 255]);
        let transform = Transform {
            rotation_deg: 90.0,
            ..Transform::at(3.0, 4.0)
        };
        canvas.draw_layer(&layer, &transform, 1.0);
        // Rotated 90 degrees the 4x2 layer stands 2 wide and 4 tall around (5, 5).
        assert_eq!(canvas.pixel(4, 3), [0, 0, 255, 255]);
        assert_eq!(canvas.pixel(5, 6), [0, 0, 255, 255]);
        assert_eq!(canvas.pixel(3, 5), [0, 0, 0, 255]);
        assert_eq!(canvas.pixel(6, 5), [0, 0, 0, 255]);
    }

    #[test]
    fn test_transparent_pixels_leave_background() {
        let mut canvas = Canvas::new(1, 1, [10, 20, 30, 255]);
        let layer = Canvas::new(1, 1, [255, 255, 255, 0]);
        canvas.draw_layer(&layer, &Transform::at(0.0, 0.0), 1.0);
        assert_eq!(canvas.pixel(0, 0), [10, 20, 30, 255]);
    }
}

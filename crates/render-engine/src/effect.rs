//! Per-node pixel effects.
//!
//! A closed set of variants, each a pure transform over a layer's pixels.
//! Time-based variants read the elapsed stream time from the
//! [`EffectContext`]; overlays read their fonts and pictures from it.

use serde::{Deserialize, Serialize};

use crate::canvas::Canvas;
use crate::overlay::{ImageOverlay, OverlayAssets, TextOverlay};

/// What an effect may read while it runs.
#[derive(Debug, Clone, Copy)]
pub struct EffectContext<'a> {
    pub elapsed_secs: f64,
    pub assets: Option<&'a OverlayAssets>,
}

impl<'a> EffectContext<'a> {
    pub fn at(elapsed_secs: f64) -> Self {
        Self {
            elapsed_secs,
            assets: None,
        }
    }

    pub fn with_assets(mut self, assets: &'a OverlayAssets) -> Self {
        self.assets = Some(assets);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Adds `amount` (-1.0..=1.0) of full scale to every channel.
    Brightness { amount: f32 },
    /// Scales distance from mid-gray; 1.0 is identity.
    Contrast { amount: f32 },
    /// 0.0 is grayscale, 1.0 identity, above 1.0 oversaturated.
    Saturation { amount: f32 },
    Grayscale,
    Invert,
    /// Makes pixels near `key` transparent.
    ChromaKey {
        key: [u8; 3],
        /// Distance (0..=441) below which pixels are fully keyed.
        threshold: f32,
        /// Extra distance over which alpha ramps back up.
        softness: f32,
    },
    Tint { color: [u8; 3], strength: f32 },
    BoxBlur { radius: u32 },
    /// Linear opacity ramp between `start_secs` and `start_secs + duration_secs`.
    Fade {
        start_secs: f64,
        duration_secs: f64,
        fade_in: bool,
    },
    /// Opacity oscillating between `min_opacity` and 1.0.
    Pulse { period_secs: f64, min_opacity: f32 },
    /// Styled text, optionally animated.
    Text(TextOverlay),
    /// A picture fitted into a box on the layer.
    Image(ImageOverlay),
}

impl Effect {
    /// Whether the output depends on elapsed time.
    pub fn is_time_based(&self) -> bool {
        match self {
            Self::Fade { .. } | Self::Pulse { .. } => true,
            Self::Text(text) => text.is_animated(),
            _ => false,
        }
    }

    pub fn apply(&self, canvas: &mut Canvas, ctx: &EffectContext<'_>) {
        let elapsed_secs = ctx.elapsed_secs;
        match *self {
            Self::Brightness { amount } => {
                let delta = amount.clamp(-1.0, 1.0) * 255.0;
                map_rgb(canvas, |c| c + delta);
            }
            Self::Contrast { amount } => {
                let amount = amount.max(0.0);
                map_rgb(canvas, |c| (c - 128.0) * amount + 128.0);
            }
            Self::Saturation { amount } => {
                let amount = amount.max(0.0);
                for px in canvas.pixels_mut() {
                    let l = luma(px);
                    for c in px.iter_mut().take(3) {
                        *c = clamp_u8(l + (*c as f32 - l) * amount);
                    }
                }
            }
            Self::Grayscale => {
                for px in canvas.pixels_mut() {
                    let l = clamp_u8(luma(px));
                    px[0] = l;
                    px[1] = l;
                    px[2] = l;
                }
            }
            Self::Invert => map_rgb(canvas, |c| 255.0 - c),
            Self::ChromaKey {
                key,
                threshold,
                softness,
            } => {
                for px in canvas.pixels_mut() {
                    let dist = color_distance([px[0], px[1], px[2]], key);
                    let keep = if dist <= threshold {
                        0.0
                    } else if softness > 0.0 && dist < threshold + softness {
                        (dist - threshold) / softness
                    } else {
                        1.0
                    };
                    px[3] = clamp_u8(px[3] as f32 * keep);
                }
            }
            Self::Tint { color, strength } => {
                let s = strength.clamp(0.0, 1.0);
                for px in canvas.pixels_mut() {
                    for i in 0..3 {
                        px[i] = clamp_u8(px[i] as f32 * (1.0 - s) + color[i] as f32 * s);
                    }
                }
            }
            Self::BoxBlur { radius } => box_blur(canvas, radius),
            Self::Fade {
                start_secs,
                duration_secs,
                fade_in,
            } => {
                let t = if duration_secs <= 0.0 {
                    if elapsed_secs >= start_secs {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    ((elapsed_secs - start_secs) / duration_secs).clamp(0.0, 1.0)
                };
                let opacity = if fade_in { t } else { 1.0 - t };
                scale_alpha(canvas, opacity as f32);
            }
            Self::Pulse {
                period_secs,
                min_opacity,
            } => {
                if period_secs > 0.0 {
                    let phase = (elapsed_secs / period_secs) * std::f64::consts::TAU;
                    let wave = (0.5 + 0.5 * phase.cos()) as f32;
                    let min = min_opacity.clamp(0.0, 1.0);
                    scale_alpha(canvas, min + (1.0 - min) * wave);
                }
            }
            Self::Text(ref overlay) => {
                if let Some(font) = ctx.assets.and_then(|a| a.font(&overlay.font)) {
                    overlay.draw(canvas, font, elapsed_secs);
                }
            }
            Self::Image(ref overlay) => {
                if let Some(picture) = ctx.assets.and_then(|a| a.image(&overlay.path)) {
                    overlay.draw(canvas, picture);
                }
            }
        }
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn luma(px: &[u8]) -> f32 {
    0.2126 * px[0] as f32 + 0.7152 * px[1] as f32 + 0.0722 * px[2] as f32
}

fn color_distance(a: [u8; 3], b: [u8; 3]) -> f32 {
    let dr = a[0] as f32 - b[0] as f32;
    let dg = a[1] as f32 - b[1] as f32;
    let db = a[2] as f32 - b[2] as f32;
    (dr * dr + dg * dg + db * db).sqrt()
}

fn map_rgb(canvas: &mut Canvas, f: impl Fn(f32) -> f32) {
    for px in canvas.pixels_mut() {
        for c in px.iter_mut().take(3) {
            *c = clamp_u8(f(*c as f32));
        }
    }
}

fn scale_alpha(canvas: &mut Canvas, factor: f32) {
    let factor = factor.clamp(0.0, 1.0);
    for px in canvas.pixels_mut() {
        px[3] = clamp_u8(px[3] as f32 * factor);
    }
}

/// Separable box blur over all four channels, edges clamped.
fn box_blur(canvas: &mut Canvas, radius: u32) {
    if radius == 0 {
        return;
    }
    let w = canvas.width() as usize;
    let h = canvas.height() as usize;
    let r = radius as usize;
    let src = canvas.data().to_vec();
    let mut tmp = vec![0u8; src.len()];

    for y in 0..h {
        for x in 0..w {
            let lo = x.saturating_sub(r);
            let hi = (x + r).min(w - 1);
            for c in 0..4 {
                let mut sum = 0u32;
                for xx in lo..=hi {
                    sum += src[(y * w + xx) * 4 + c] as u32;
                }
                tmp[(y * w + x) * 4 + c] = (sum / (hi - lo + 1) as u32) as u8;
            }
        }
    }

    for (i, px) in canvas.pixels_mut().enumerate() {
        let x = i % w;
        let y = i / w;
        let lo = y.saturating_sub(r);
        let hi = (y + r).min(h - 1);
        for c in 0..4 {
            let mut sum = 0u32;
            for yy in lo..=hi {
                sum += tmp[(yy * w + x) * 4 + c] as u32;
            }
            px[c] = (sum / (hi - lo + 1) as u32) as u8;
        }
    }
}

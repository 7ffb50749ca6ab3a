//! Text and image overlays drawn on top of a layer.
//!
//! Fonts and pictures are loaded once per path into [`OverlayAssets`] by the
//! compositor before a pass; drawing only reads them. A path that fails to
//! load is remembered and its overlay skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use rusttype::{point, Font, PositionedGlyph, Scale};
use serde::{Deserialize, Serialize};

use crate::canvas::{blend_over, Canvas};
use crate::effect::Effect;
use crate::scene::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

/// How overlay text changes with stream time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TextAnimation {
    #[default]
    Static,
    /// Reveal `chars_per_sec` characters per second from `start_secs`.
    Typewriter { chars_per_sec: f64, start_secs: f64 },
    /// Scroll right to left across the layer, wrapping around.
    Crawl { px_per_sec: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBackground {
    pub color: [u8; 4],
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextShadow {
    pub offset: i32,
    pub color: [u8; 4],
}

impl Default for TextShadow {
    fn default() -> Self {
        Self {
            offset: 3,
            color: [0, 0, 0, 128],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextOutline {
    pub width: u32,
    pub color: [u8; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextOverlay {
    pub text: String,
    /// TrueType or OpenType font file.
    pub font: PathBuf,
    #[serde(default = "default_size_px")]
    pub size_px: f32,
    /// Anchor point as fractions of the layer size.
    #[serde(default = "default_anchor")]
    pub anchor: [f32; 2],
    #[serde(default)]
    pub align: TextAlign,
    #[serde(default = "default_text_color")]
    pub color: [u8; 4],
    #[serde(default)]
    pub background: Option<TextBackground>,
    #[serde(default)]
    pub shadow: Option<TextShadow>,
    #[serde(default)]
    pub outline: Option<TextOutline>,
    #[serde(default)]
    pub animation: TextAnimation,
}

fn default_size_px() -> f32 {
    36.0
}

fn default_anchor() -> [f32; 2] {
    [0.5, 0.5]
}

fn default_text_color() -> [u8; 4] {
    [255, 255, 255, 255]
}

fn default_opacity() -> f32 {
    1.0
}

impl TextOverlay {
    pub fn new(text: impl Into<String>, font: impl Into<PathBuf>) -> Self {
        Self {
            text: text.into(),
            font: font.into(),
            size_px: default_size_px(),
            anchor: default_anchor(),
            align: TextAlign::default(),
            color: default_text_color(),
            background: None,
            shadow: None,
            outline: None,
            animation: TextAnimation::default(),
        }
    }

    pub fn is_animated(&self) -> bool {
        self.animation != TextAnimation::Static
    }

    /// The part of the text shown at `elapsed_secs`.
    pub fn visible_text(&self, elapsed_secs: f64) -> &str {
        let TextAnimation::Typewriter {
            chars_per_sec,
            start_secs,
        } = self.animation
        else {
            return &self.text;
        };
        let shown = ((elapsed_secs - start_secs) * chars_per_sec).floor();
        if shown < 1.0 {
            return "";
        }
        match self.text.char_indices().nth(shown as usize) {
            Some((end, _)) => &self.text[..end],
            None => &self.text,
        }
    }

    /// Left edge of a `text_w` wide text box on a `layer_w` wide layer.
    pub fn box_x(&self, text_w: f32, layer_w: f32, elapsed_secs: f64) -> f32 {
        if let TextAnimation::Crawl { px_per_sec } = self.animation {
            let span = (layer_w + text_w) as f64;
            if span <= 0.0 {
                return 0.0;
            }
            let travelled = (elapsed_secs.max(0.0) * px_per_sec).rem_euclid(span);
            return (layer_w as f64 - travelled) as f32;
        }
        let anchor = self.anchor[0] * layer_w;
        let x = match self.align {
            TextAlign::Left => anchor,
            TextAlign::Center => anchor - text_w / 2.0,
            TextAlign::Right => anchor - text_w,
        };
        x.clamp(0.0, (layer_w - text_w).max(0.0))
    }

    /// Top edge of a `text_h` tall text box, centered on the anchor.
    pub fn box_y(&self, text_h: f32, layer_h: f32) -> f32 {
        (self.anchor[1] * layer_h - text_h / 2.0).clamp(0.0, (layer_h - text_h).max(0.0))
    }

    pub(crate) fn draw(&self, canvas: &mut Canvas, font: &Font<'static>, elapsed_secs: f64) {
        let text = self.visible_text(elapsed_secs);
        if text.trim().is_empty() {
            return;
        }

        let scale = Scale::uniform(self.size_px.max(1.0));
        let metrics = font.v_metrics(scale);
        let glyphs: Vec<PositionedGlyph<'_>> = font.layout(text, scale, point(0.0, metrics.ascent)).collect();
        let text_w = glyphs
            .last()
            .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
            .unwrap_or(0.0)
            .ceil()
            .max(1.0);
        let text_h = (metrics.ascent - metrics.descent).ceil().max(1.0);

        let pad = self.background.map_or(0, |b| b.padding);
        let outline = self.outline.map_or(0, |o| o.width);
        let shadow = self.shadow.map_or(0, |s| s.offset.unsigned_abs());
        let margin = pad.max(outline) + shadow;
        let mut scratch = RgbaImage::new(text_w as u32 + margin * 2, text_h as u32 + margin * 2);

        if let Some(bg) = self.background {
            let inset = (margin - pad) as i32;
            let rect = Rect::at(inset, inset).of_size(text_w as u32 + pad * 2, text_h as u32 + pad * 2);
            draw_filled_rect_mut(&mut scratch, rect, Rgba(bg.color));
        }

        let origin = margin as i32;
        if let Some(s) = self.shadow {
            stamp(&mut scratch, &glyphs, origin + s.offset, origin + s.offset, s.color);
        }
        if let Some(o) = self.outline {
            let w = o.width as i32;
            for dy in -w..=w {
                for dx in -w..=w {
                    if (dx, dy) != (0, 0) && dx * dx + dy * dy <= w * w {
                        stamp(&mut scratch, &glyphs, origin + dx, origin + dy, o.color);
                    }
                }
            }
        }
        stamp(&mut scratch, &glyphs, origin, origin, self.color);

        let x = self.box_x(text_w, canvas.width() as f32, elapsed_secs) - margin as f32;
        let y = self.box_y(text_h, canvas.height() as f32) - margin as f32;
        canvas.draw_layer(&Canvas::from_rgba_image(scratch), &Transform::at(x, y), 1.0);
    }
}

/// Blend glyph coverage in `color` onto `image`, shifted by `(dx, dy)`.
fn stamp(image: &mut RgbaImage, glyphs: &[PositionedGlyph<'_>], dx: i32, dy: i32, color: [u8; 4]) {
    let (w, h) = image.dimensions();
    for glyph in glyphs {
        let Some(bb) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, coverage| {
            let x = bb.min.x + gx as i32 + dx;
            let y = bb.min.y + gy as i32 + dy;
            if x < 0 || y < 0 || x as u32 >= w || y as u32 >= h {
                return;
            }
            let src = [color[0], color[1], color[2], (color[3] as f32 * coverage).round() as u8];
            blend_over(&mut image.get_pixel_mut(x as u32, y as u32).0, src, 255);
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub width: u32,
    pub color: [u8; 4],
}

/// A picture fitted into a box, optionally framed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOverlay {
    pub path: PathBuf,
    /// x, y, width, height as fractions of the layer size.
    pub rect: [f32; 4],
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub frame: Option<ImageFrame>,
}

impl ImageOverlay {
    pub(crate) fn draw(&self, canvas: &mut Canvas, picture: &Canvas) {
        let (lw, lh) = (canvas.width() as f32, canvas.height() as f32);
        let [fx, fy, fw, fh] = self.rect;
        let (w, h) = (fw * lw, fh * lh);
        if w < 1.0 || h < 1.0 {
            return;
        }
        let place = Transform::fit(picture.width(), picture.height(), fx * lw, fy * lh, w, h);

        if let Some(frame) = self.frame.filter(|f| f.width > 0) {
            let b = frame.width as f32;
            let fw = (picture.width() as f32 * place.scale_x + 2.0 * b).round().max(1.0) as u32;
            let fh = (picture.height() as f32 * place.scale_y + 2.0 * b).round().max(1.0) as u32;
            let border = Canvas::from_rgba_image(RgbaImage::from_pixel(fw, fh, Rgba(frame.color)));
            canvas.draw_layer(&border, &Transform::at(place.x - b, place.y - b), self.opacity);
        }
        canvas.draw_layer(picture, &place, self.opacity);
    }
}

/// Fonts and pictures referenced by overlay effects, keyed by path.
#[derive(Default)]
pub struct OverlayAssets {
    fonts: HashMap<PathBuf, Option<Font<'static>>>,
    images: HashMap<PathBuf, Option<Canvas>>,
}

impl std::fmt::Debug for OverlayAssets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayAssets")
            .field("fonts", &self.fonts.keys().collect::<Vec<_>>())
            .field("images", &self.images.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OverlayAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every font and picture `effects` refer to that has not been
    /// tried yet.
    pub fn prepare<'a>(&mut self, effects: impl IntoIterator<Item = &'a Effect>) {
        for effect in effects {
            match effect {
                Effect::Text(text) if !self.fonts.contains_key(&text.font) => {
                    let font = load_font(&text.font);
                    self.fonts.insert(text.font.clone(), font);
                }
                Effect::Image(overlay) if !self.images.contains_key(&overlay.path) => {
                    let picture = load_image(&overlay.path);
                    self.images.insert(overlay.path.clone(), picture);
                }
                _ => {}
            }
        }
    }

    pub fn font(&self, path: &Path) -> Option<&Font<'static>> {
        self.fonts.get(path).and_then(Option::as_ref)
    }

    pub fn image(&self, path: &Path) -> Option<&Canvas> {
        self.images.get(path).and_then(Option::as_ref)
    }
}

fn load_font(path: &Path) -> Option<Font<'static>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Font unreadable; text overlay skipped");
            return None;
        }
    };
    let font = Font::try_from_vec(bytes);
    if font.is_none() {
        tracing::warn!(path = %path.display(), "Not a usable font; text overlay skipped");
    }
    font
}

fn load_image(path: &Path) -> Option<Canvas> {
    match image::open(path) {
        Ok(picture) => Some(Canvas::from_rgba_image(picture.to_rgba8())),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Image unreadable; overlay skipped");
            None
        }
    }
}

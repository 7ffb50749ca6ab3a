//! Frame compositor: merges every source's frame into one output frame.
//!
//! Sources hand frames to [`Compositor::submit`] as they arrive. Each
//! [`Compositor::composite`] pass picks, per source, the newest frame at or
//! before the target PTS (never a future one), runs the node's effects,
//! and blends nodes back to front.

use std::collections::{HashMap, VecDeque};

use golive_common::error::{GoliveError, GoliveResult};
use golive_media_model::{Frame, SourceId};

use crate::canvas::Canvas;
use crate::effect::EffectContext;
use crate::overlay::OverlayAssets;
use crate::scene::SceneGraph;

#[derive(Debug, Clone)]
pub struct CompositorConfig {
    pub width: u32,
    pub height: u32,
    /// Future frames kept per source awaiting their target PTS.
    pub history: usize,
    /// Drawn for a source that has never delivered a usable frame.
    pub placeholder: [u8; 4],
}

impl CompositorConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            history: 8,
            placeholder: [32, 32, 32, 255],
        }
    }
}

#[derive(Debug, Default)]
struct SourceFrames {
    /// Frames newer than the last target, oldest first.
    pending: VecDeque<Frame>,
    /// Newest frame at or before the last target. Shown while a source is
    /// stalled.
    current: Option<Frame>,
    /// Size drawn for the placeholder until a frame arrives.
    declared_size: Option<(u32, u32)>,
}

impl SourceFrames {
    fn newest_pts(&self) -> Option<u64> {
        self.pending
            .back()
            .or(self.current.as_ref())
            .map(Frame::pts_ns)
    }

    /// Promote every pending frame due at `target` and return the newest.
    fn select(&mut self, target: u64) -> Option<&Frame> {
        while self
            .pending
            .front()
            .is_some_and(|frame| frame.pts_ns() <= target)
        {
            self.current = self.pending.pop_front();
        }
        self.current.as_ref()
    }
}

/// Result of one composite pass.
#[derive(Debug, Clone)]
pub struct CompositeOutput {
    pub frame: Frame,
    /// PTS of the input frame used for each drawn node's source; `None`
    /// where a placeholder was drawn.
    pub selected: Vec<(SourceId, Option<u64>)>,
}

impl CompositeOutput {
    pub fn selected_pts(&self, source: &SourceId) -> Option<u64> {
        self.selected
            .iter()
            .find(|(id, _)| id == source)
            .and_then(|(_, pts)| *pts)
    }
}

#[derive(Debug)]
pub struct Compositor {
    config: CompositorConfig,
    sources: HashMap<SourceId, SourceFrames>,
    assets: OverlayAssets,
    last_output_pts: Option<u64>,
    frames_composited: u64,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self {
            config,
            sources: HashMap::new(),
            assets: OverlayAssets::new(),
            last_output_pts: None,
            frames_composited: 0,
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn last_output_pts(&self) -> Option<u64> {
        self.last_output_pts
    }

    pub fn frames_composited(&self) -> u64 {
        self.frames_composited
    }

    /// Record the size a source is expected to deliver, so its placeholder
    /// occupies the same area as its frames will.
    pub fn declare_source(&mut self, source: SourceId, width: u32, height: u32) {
        self.sources.entry(source).or_default().declared_size = Some((width, height));
    }

    /// Hand a frame to the compositor.
    ///
    /// Returns `false` (and discards the frame) if its PTS does not exceed
    /// the newest PTS already held for that source.
    pub fn submit(&mut self, source: &SourceId, frame: Frame) -> bool {
        let history = self.config.history.max(1);
        let slot = self.sources.entry(source.clone()).or_default();
        if slot
            .newest_pts()
            .is_some_and(|newest| frame.pts_ns() <= newest)
        {
            tracing::trace!(source = %source, pts = frame.pts_ns(), "Out-of-order frame ignored");
            return false;
        }
        slot.pending.push_back(frame);
        while slot.pending.len() > history {
            slot.pending.pop_front();
        }
        true
    }

    pub fn forget_source(&mut self, source: &SourceId) {
        self.sources.remove(source);
    }

    /// Compose the scene for `target_pts`.
    ///
    /// Fails if `target_pts` does not exceed the previous pass's PTS; output
    /// timestamps are strictly increasing.
    pub fn composite(&mut self, graph: &SceneGraph, target_pts: u64) -> GoliveResult<CompositeOutput> {
        if let Some(last) = self.last_output_pts {
            if target_pts <= last {
                return Err(GoliveError::render(format!(
                    "Target PTS {target_pts} does not follow previous output {last}"
                )));
            }
        }

        // Selection runs for every referenced source, drawn or not, so hidden
        // sources still release stale frames.
        for source in graph.sources() {
            if let Some(slot) = self.sources.get_mut(source) {
                slot.select(target_pts);
            }
        }

        // Fonts and pictures load the first time a node refers to them.
        let nodes = graph.draw_order();
        self.assets
            .prepare(nodes.iter().flat_map(|node| node.effects.iter()));
        let ctx = EffectContext::at(target_pts as f64 / 1e9).with_assets(&self.assets);
        let mut canvas = Canvas::new(self.config.width, self.config.height, graph.background);
        let mut selected = Vec::new();

        for node in nodes {
            let slot = self.sources.get(&node.source);
            let frame = slot.and_then(|s| s.current.as_ref());
            selected.push((node.source.clone(), frame.map(Frame::pts_ns)));

            let mut layer = match frame {
                Some(frame) => Canvas::from_frame(frame),
                None => {
                    let (w, h) = slot
                        .and_then(|s| s.declared_size)
                        .unwrap_or((self.config.width, self.config.height));
                    Canvas::new(w, h, self.config.placeholder)
                }
            };
            for effect in &node.effects {
                effect.apply(&mut layer, &ctx);
            }
            canvas.draw_layer(&layer, &node.transform, node.opacity);
        }

        let frame = canvas.into_frame(target_pts)?;
        self.last_output_pts = Some(target_pts);
        self.frames_composited += 1;
        tracing::trace!(pts = target_pts, nodes = selected.len(), "Composited frame");

        Ok(CompositeOutput { frame, selected })
    }

    /// Forget all frames and the output PTS history.
    pub fn reset(&mut self) {
        self.sources.clear();
        self.last_output_pts = None;
        self.frames_composited = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Effect;
    use crate::scene::{SceneNode, Transform};

    fn graph_with(ids: &[&str]) -> SceneGraph {
        let mut graph = SceneGraph::default();
        for (z, id) in ids.iter().enumerate() {
            graph
                .add(SceneNode::new(*id, SourceId::new(*id)).with_z_order(z as i32))
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_selects_nearest_below_never_future() {
        let mut comp = Compositor::new(CompositorConfig::new(4, 4));
        let cam = SourceId::new("cam");
        for pts in [10, 20, 30] {
            assert!(comp.submit(&cam, Frame::solid(pts, 4, 4, [pts as u8, 0, 0, 255])));
        }
        let graph = graph_with(&["cam"]);

        let out = comp.composite(&graph, 25).unwrap();
        assert_eq!(out.selected_pts(&cam), Some(20));
        assert_eq!(out.frame.pixel(0, 0), [20, 0, 0, 255]);

        let out = comp.composite(&graph, 29).unwrap();
        assert_eq!(out.selected_pts(&cam), Some(20));

        let out = comp.composite(&graph, 30).unwrap();
        assert_eq!(out.selected_pts(&cam), Some(30));
    }

    #[test]
    fn test_missing_source_draws_placeholder() {
        let mut comp = Compositor::new(CompositorConfig::new(2, 2));
        let graph = graph_with(&["cam"]);
        let out = comp.composite(&graph, 1).unwrap();
        assert_eq!(out.selected_pts(&SourceId::new("cam")), None);
        assert_eq!(out.frame.pixel(1, 1), [32, 32, 32, 255]);
    }

    #[test]
    fn test_stalled_source_keeps_last_frame() {
        let mut comp = Compositor::new(CompositorConfig::new(2, 2));
        let cam = SourceId::new("cam");
        comp.submit(&cam, Frame::solid(5, 2, 2, [1, 2, 3, 255]));
        let graph = graph_with(&["cam"]);
        comp.composite(&graph, 10).unwrap();
        let out = comp.composite(&graph, 1_000_000_000).unwrap();
        assert_eq!(out.selected_pts(&cam), Some(5));
        assert_eq!(out.frame.pixel(0, 0), [1, 2, 3, 255]);
    }

    #[test]
    fn test_rejects_non_increasing_target() {
        let mut comp = Compositor::new(CompositorConfig::new(2, 2));
        let graph = SceneGraph::default();
        comp.composite(&graph, 100).unwrap();
        assert!(comp.composite(&graph, 100).is_err());
        assert!(comp.composite(&graph, 99).is_err());
        assert!(comp.composite(&graph, 101).is_ok());
        assert_eq!(comp.frames_composited(), 2);
    }

    #[test]
    fn test_out_of_order_submit_ignored() {
        let mut comp = Compositor::new(CompositorConfig::new(2, 2));
        let cam = SourceId::new("cam");
        assert!(comp.submit(&cam, Frame::solid(50, 2, 2, [0, 0, 0, 255])));
        assert!(!comp.submit(&cam, Frame::solid(40, 2, 2, [0, 0, 0, 255])));
        assert!(!comp.submit(&cam, Frame::solid(50, 2, 2, [0, 0, 0, 255])));
    }

    #[test]
    fn test_blends_back_to_front_with_effects() {
        let mut comp = Compositor::new(CompositorConfig::new(2, 1));
        let bg = SourceId::new("bg");
        let logo = SourceId::new("logo");
        comp.submit(&bg, Frame::solid(0, 2, 1, [0, 0, 200, 255]));
        comp.submit(&logo, Frame::solid(0, 1, 1, [10, 20, 30, 255]));

        let mut graph = SceneGraph::default();
        graph
            .add(
                SceneNode::new("logo", logo.clone())
                    .with_z_order(1)
                    .with_transform(Transform::at(1.0, 0.0))
                    .with_effect(Effect::Invert),
            )
            .unwrap();
        graph.add(SceneNode::new("bg", bg).with_z_order(0)).unwrap();

        let out = comp.composite(&graph, 1).unwrap();
        assert_eq!(out.frame.pixel(0, 0), [0, 0, 200, 255]);
        assert_eq!(out.frame.pixel(1, 0), [245, 235, 225, 255]);
        assert_eq!(out.frame.pts_ns(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut config = CompositorConfig::new(2, 2);
        config.history = 2;
        let mut comp = Compositor::new(config);
        let cam = SourceId::new("cam");
        for pts in 1..=5 {
            comp.submit(&cam, Frame::solid(pts, 2, 2, [0, 0, 0, 255]));
        }
        let out = comp.composite(&graph_with(&["cam"]), 4).unwrap();
        assert_eq!(out.selected_pts(&cam), Some(4));
    }

    #[test]
    fn test_picture_overlay_loads_once_and_draws_on_layer() {
        let path = std::env::temp_dir().join(format!("golive-logo-{}.png", std::process::id()));
        image::RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 255, 255]))
            .save(&path)
            .unwrap();

        let mut comp = Compositor::new(CompositorConfig::new(4, 4));
        let cam = SourceId::new("cam");
        comp.submit(&cam, Frame::solid(1, 4, 4, [10, 10, 10, 255]));
        let mut graph = SceneGraph::default();
        graph
            .add(SceneNode::new("cam", cam.clone()).with_effect(Effect::Image(
                crate::overlay::ImageOverlay {
                    path: path.clone(),
                    rect: [0.5, 0.5, 0.5, 0.5],
                    opacity: 1.0,
                    frame: None,
                },
            )))
            .unwrap();

        let out = comp.composite(&graph, 2).unwrap();
        assert_eq!(out.frame.pixel(3, 3), [0, 0, 255, 255]);
        assert_eq!(out.frame.pixel(0, 0), [10, 10, 10, 255]);

        // Already cached; the file is no longer needed.
        std::fs::remove_file(&path).unwrap();
        let out = comp.composite(&graph, 3).unwrap();
        assert_eq!(out.frame.pixel(2, 2), [0, 0, 255, 255]);
    }
}

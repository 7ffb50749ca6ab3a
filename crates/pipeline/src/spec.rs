//! What a pipeline run produces: sources, scene, encoding and destination.

use golive_common::error::{GoliveError, GoliveResult};
use golive_media_model::{EncoderConfig, OutputTarget, QualityLevel, SourceConfig};
use golive_render_engine::{SceneGraph, SceneNode, Transform};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub sources: Vec<SourceConfig>,
    pub scene: SceneGraph,
    pub encoder: EncoderConfig,
    pub output: OutputTarget,

    /// Ladder level to encode at. Overrides the encoder's resolution, frame
    /// rate and bitrate when set.
    #[serde(default)]
    pub quality: Option<QualityLevel>,
}

impl PipelineSpec {
    /// A spec whose scene is [`tiled_scene`] over `sources`.
    pub fn new(sources: Vec<SourceConfig>, encoder: EncoderConfig, output: OutputTarget) -> Self {
        let scene = tiled_scene(&sources, encoder.width, encoder.height);
        Self {
            sources,
            scene,
            encoder,
            output,
            quality: None,
        }
    }

    /// Encoder settings actually opened: quality level applied and the mux
    /// chosen by the output target.
    pub fn effective_encoder(&self) -> EncoderConfig {
        let mut config = match self.quality {
            Some(level) => crate::quality::apply_level(&self.encoder, level),
            None => self.encoder.clone(),
        };
        config.mux = self.output.encoder_mux();
        config
    }

    pub fn validate(&self) -> GoliveResult<()> {
        self.effective_encoder().validate().map_err(GoliveError::config)?;
        if self.sources.is_empty() {
            return Err(GoliveError::config("at least one source is required"));
        }
        for (i, source) in self.sources.iter().enumerate() {
            if self.sources[..i].iter().any(|s| s.id == source.id) {
                return Err(GoliveError::config(format!("duplicate source id {}", source.id)));
            }
        }
        for node in self.scene.nodes() {
            if !self.sources.iter().any(|s| s.id == node.source) {
                return Err(GoliveError::config(format!(
                    "scene node '{}' references unknown source {}",
                    node.id, node.source
                )));
            }
        }
        Ok(())
    }
}

/// First video source full frame; the rest as picture-in-picture tiles
/// stacked along the right edge.
pub fn tiled_scene(sources: &[SourceConfig], width: u32, height: u32) -> SceneGraph {
    let mut scene = SceneGraph::default();
    let (w, h) = (width as f32, height as f32);
    let tile_w = w / 4.0;
    let tile_h = h / 4.0;
    let margin = w / 64.0;

    for (i, source) in sources.iter().filter(|s| s.video).enumerate() {
        let transform = if i == 0 {
            Transform::fit(source.width, source.height, 0.0, 0.0, w, h)
        } else {
            let slot = (i - 1) as f32;
            Transform::fit(
                source.width,
                source.height,
                w - tile_w - margin,
                margin + slot * (tile_h + margin),
                tile_w,
                tile_h,
            )
        };
        let node = SceneNode::new(source.id.as_str(), source.id.clone())
            .with_transform(transform)
            .with_z_order(i as i32);
        if let Err(e) = scene.add(node) {
            tracing::warn!(error = %e, "Source left out of the default scene");
        }
    }
    scene
}

#[cfg(test)]
mod tests {
    use super::*;
    use golive_media_model::{MuxFormat, SourceKind};

    fn pattern(id: &str) -> SourceConfig {
        SourceConfig::new(id, SourceKind::TestPattern { tone_hz: None }, 640, 360, 30)
    }

    #[test]
    fn test_tiled_scene_layers_extra_sources_on_top() {
        let scene = tiled_scene(&[pattern("main"), pattern("pip")], 1280, 720);
        let order: Vec<&str> = scene.draw_order().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["main", "pip"]);
        assert!(scene.get("pip").unwrap().transform.x > 640.0);
    }

    #[test]
    fn test_network_output_forces_mpegts() {
        let mut spec = PipelineSpec::new(
            vec![pattern("main")],
            EncoderConfig::default(),
            OutputTarget::network("rtmp://live.example.com/app", None).unwrap(),
        );
        spec.encoder.mux = MuxFormat::FragmentedMp4;
        assert_eq!(spec.effective_encoder().mux, MuxFormat::MpegTs);
    }

    #[test]
    fn test_scene_must_reference_known_sources() {
        let mut spec = PipelineSpec::new(
            vec![pattern("main")],
            EncoderConfig::default(),
            OutputTarget::file("/tmp/out.ts"),
        );
        spec.scene
            .add(SceneNode::new("ghost", golive_media_model::SourceId::new("ghost")))
            .unwrap();
        assert!(matches!(spec.validate(), Err(GoliveError::Config { .. })));
    }
}

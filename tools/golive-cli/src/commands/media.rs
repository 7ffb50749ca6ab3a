//! Source and encoder options shared by `stream` and `record`.

use std::path::PathBuf;

use anyhow::anyhow;
use clap::Args;
use golive_common::config::OutputDefaults;
use golive_media_model::{
    BackendKind, EncoderConfig, EncoderPreset, OutputTarget, QualityLevel, SourceConfig, SourceKind, VideoCodec,
};
use golive_pipeline::PipelineSpec;

/// Sources are laid out in flag order: cameras, screens, media, network,
/// test pattern. The first one fills the frame; the rest become insets.
/// With no source flags a test pattern with a 440 Hz tone is used.
#[derive(Args, Debug, Clone, Default)]
pub struct MediaArgs {
    /// Camera device (e.g. /dev/video0); repeatable
    #[arg(long)]
    pub camera: Vec<String>,

    /// Screen/display index to capture; repeatable
    #[arg(long, num_args = 0..=1, default_missing_value = "0")]
    pub screen: Vec<u32>,

    /// Media file to play; repeatable
    #[arg(long)]
    pub media: Vec<PathBuf>,

    /// Loop media files
    #[arg(long = "loop")]
    pub looped: bool,

    /// Network input URL (e.g. srt://..., rtsp://...); repeatable
    #[arg(long)]
    pub network: Vec<String>,

    /// Add a color-bar test pattern
    #[arg(long)]
    pub test_pattern: bool,

    /// Sine tone for the test pattern, in Hz
    #[arg(long)]
    pub tone: Option<f32>,

    /// Capture audio from camera, media and network sources
    #[arg(long)]
    pub audio: bool,

    /// Output width (defaults to the config file)
    #[arg(long)]
    pub width: Option<u32>,

    /// Output height (defaults to the config file)
    #[arg(long)]
    pub height: Option<u32>,

    /// Output frame rate (defaults to the config file)
    #[arg(long)]
    pub fps: Option<u32>,

    /// Video bitrate in kbps (0 picks one from resolution and frame rate)
    #[arg(long, default_value = "0")]
    pub bitrate: u32,

    /// Video codec: h264 or hevc (defaults to the config file)
    #[arg(long)]
    pub codec: Option<String>,

    /// Encoder speed preset, x264 names
    #[arg(long, default_value = "veryfast")]
    pub preset: String,

    /// Encoder backend to try; repeat to set the order (nvenc, vaapi, qsv,
    /// amf, videotoolbox, software)
    #[arg(long)]
    pub backend: Vec<String>,

    /// Quality ladder level: ultra, high, medium or low
    #[arg(long)]
    pub quality: Option<String>,
}

impl MediaArgs {
    pub fn into_spec(self, output: OutputTarget, defaults: &OutputDefaults) -> anyhow::Result<PipelineSpec> {
        let width = self.width.unwrap_or(defaults.width);
        let height = self.height.unwrap_or(defaults.height);
        let fps = self.fps.unwrap_or(defaults.fps);

        let sources: Vec<SourceConfig> = self
            .source_kinds()
            .into_iter()
            .enumerate()
            .map(|(i, (kind, audio))| {
                let config = SourceConfig::new(format!("{}-{i}", kind.registry_key()), kind, width, height, fps);
                if audio {
                    config.with_audio(defaults.audio_sample_rate, defaults.audio_channels)
                } else {
                    config
                }
            })
            .collect();

        let codec: VideoCodec = self.codec.as_deref().unwrap_or(&defaults.video_codec).parse()?;
        let preset: EncoderPreset = self.preset.parse()?;
        let mut encoder = EncoderConfig {
            codec,
            width,
            height,
            fps,
            bitrate_kbps: self.bitrate,
            preset,
            sample_rate: defaults.audio_sample_rate,
            channels: defaults.audio_channels,
            ..Default::default()
        };
        if !self.backend.is_empty() {
            encoder.backend_preference = self
                .backend
                .iter()
                .map(|name| name.trim().parse::<BackendKind>())
                .collect::<Result<_, _>>()?;
        }

        let mut spec = PipelineSpec::new(sources, encoder, output);
        spec.quality = self.quality.as_deref().map(parse_quality).transpose()?;
        Ok(spec)
    }

    /// Every requested source with whether it carries audio.
    fn source_kinds(&self) -> Vec<(SourceKind, bool)> {
        let mut kinds = Vec::new();
        for device in &self.camera {
            kinds.push((SourceKind::Camera { device: device.clone() }, self.audio));
        }
        for display in &self.screen {
            kinds.push((
                SourceKind::Screen {
                    display: *display,
                    region: None,
                },
                false,
            ));
        }
        for path in &self.media {
            kinds.push((
                SourceKind::MediaFile {
                    path: path.clone(),
                    looped: self.looped,
                },
                self.audio,
            ));
        }
        for url in &self.network {
            kinds.push((SourceKind::Network { url: url.clone() }, self.audio));
        }
        if self.test_pattern || kinds.is_empty() {
            let tone_hz = match (self.tone, kinds.is_empty() && !self.test_pattern) {
                (Some(hz), _) => Some(hz),
                (None, true) => Some(440.0),
                (None, false) => None,
            };
            kinds.push((SourceKind::TestPattern { tone_hz }, tone_hz.is_some()));
        }
        kinds
    }
}

fn parse_quality(value: &str) -> anyhow::Result<QualityLevel> {
    match value.to_ascii_lowercase().as_str() {
        "ultra" => Ok(QualityLevel::Ultra),
        "high" => Ok(QualityLevel::High),
        "medium" => Ok(QualityLevel::Medium),
        "low" => Ok(QualityLevel::Low),
        other => Err(anyhow!("Unknown quality level: {other}. Use: ultra, high, medium, low")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        media: MediaArgs,
    }

    fn parse(args: &[&str]) -> MediaArgs {
        Wrapper::parse_from(std::iter::once("golive").chain(args.iter().copied())).media
    }

    #[test]
    fn test_sources_and_backend_order() {
        let media = parse(&[
            "--camera",
            "/dev/video0",
            "--screen",
            "--test-pattern",
            "--audio",
            "--backend",
            "nvenc",
            "--backend",
            "software",
            "--width",
            "1280",
            "--height",
            "720",
        ]);
        let spec = media
            .into_spec(OutputTarget::file("out.mkv"), &OutputDefaults::default())
            .unwrap();

        assert_eq!(spec.sources.len(), 3);
        assert_eq!(spec.sources[0].id.as_str(), "camera-0");
        assert!(spec.sources[0].audio);
        assert_eq!(spec.sources[1].kind, SourceKind::Screen { display: 0, region: None });
        assert!(!spec.sources[2].audio);
        assert_eq!(spec.encoder.backend_preference, vec![BackendKind::Nvenc, BackendKind::Software]);
        assert_eq!((spec.encoder.width, spec.encoder.height), (1280, 720));
        assert_eq!(spec.scene.len(), 3);
        spec.validate().unwrap();
    }

    #[test]
    fn test_no_sources_means_test_pattern_with_tone() {
        let spec = parse(&[])
            .into_spec(OutputTarget::file("out.mp4"), &OutputDefaults::default())
            .unwrap();
        assert_eq!(spec.sources.len(), 1);
        assert_eq!(spec.sources[0].kind, SourceKind::TestPattern { tone_hz: Some(440.0) });
        assert!(spec.sources[0].audio);
    }

    #[test]
    fn test_rejects_unknown_backend_and_quality() {
        let defaults = OutputDefaults::default();
        assert!(parse(&["--backend", "quantum"])
            .into_spec(OutputTarget::file("a.mp4"), &defaults)
            .is_err());
        assert!(parse(&["--quality", "max"])
            .into_spec(OutputTarget::file("a.mp4"), &defaults)
            .is_err());
    }
}
